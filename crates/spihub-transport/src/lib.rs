//! Unix domain socket transport for the SPI hub broker.
//!
//! The broker serves unprivileged local processes over a filesystem-path
//! stream socket. This crate owns binding (with stale-socket cleanup and an
//! explicit permission mode), accepting, connecting, and peer-credential
//! lookup. Framing lives one layer up, in `spihub-frame`.

pub mod error;
pub mod socket;

pub use error::{Result, TransportError};
pub use socket::{peer_credentials, HubSocket};

//! Wire formats for the SPI hub broker.
//!
//! Three layers share this crate:
//! - [`codec`] frames byte payloads on the local stream socket: a 2-byte
//!   magic ("SH") plus a 4-byte little-endian length. [`reader`] and
//!   [`writer`] turn any `Read`/`Write` into whole-message I/O.
//! - [`spi`] encodes the asymmetric request/response frames that share a
//!   single full-duplex SPI buffer.
//! - [`ipc`] is the hub protocol carried inside socket frames: outbound
//!   message batches, device-originated messages, and the device-list
//!   bootstrap document.

pub mod codec;
pub mod error;
pub mod ipc;
pub mod reader;
pub mod spi;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{FrameError, WireError};
pub use reader::FrameReader;
pub use writer::FrameWriter;

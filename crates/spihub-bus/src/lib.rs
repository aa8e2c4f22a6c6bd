//! Device model, per-device transmit queues, and the bus service loop.
//!
//! A [`bus::SharedBus`] holds the mutable state both sides touch: the IPC
//! ingress path enqueues outbound messages and marks the bus pending; the
//! service loop (the sole SPI owner) drains queues, polls idle devices, and
//! hands device-originated messages to a [`service::ResponseSink`]. The two
//! meet only through the bus mutex and the capacity-1 [`wake`] channel.

pub mod bus;
pub mod device;
pub mod error;
pub mod irq;
pub mod queue;
pub mod service;
pub mod wake;
pub mod xfer;

pub use bus::{BusState, SharedBus};
pub use device::{declared_chain, Device, DEFAULT_BUS_SPEED_HZ};
pub use error::{BusError, Result};
pub use queue::{TxEntry, TxQueue};
pub use service::{run_service, BusDriver, ResponseSink, MAX_SERVICE_RESTARTS};
pub use wake::{wake_channel, WakeHandle, WakeReceiver};
pub use xfer::{SpiExchange, SpidevExchange};

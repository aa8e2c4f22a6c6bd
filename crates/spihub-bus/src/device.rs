use spihub_frame::ipc::DeviceInfo;

use crate::queue::TxQueue;

/// Default SPI clock when a bus declares no speed.
pub const DEFAULT_BUS_SPEED_HZ: u32 = 1_000_000;

/// One device on a bus chain.
#[derive(Debug)]
pub struct Device {
    /// Unique within the bus, 1-based; 0 is the broadcast/no-target id.
    pub id: u8,
    pub info: DeviceInfo,
    pub tx_queue: TxQueue,
    /// Response length the device last advertised for its next frame.
    /// Absent until the first clean response, cleared on a bad one.
    pub next_msg_len: Option<u16>,
}

impl Device {
    pub fn new(id: u8, model: &str) -> Self {
        Self {
            id,
            info: DeviceInfo {
                model: model.to_string(),
                version: FIRMWARE_VERSION.to_string(),
            },
            tx_queue: TxQueue::new(),
            next_msg_len: None,
        }
    }
}

const FIRMWARE_VERSION: &str = "1.0.0";

/// The physical topology this broker is built for: a CM8 head unit followed
/// by four IO16 expansion units. Startup probes this chain and keeps only
/// the ids that answered.
pub fn declared_chain() -> Vec<Device> {
    let mut chain = vec![Device::new(1, "iron-pi-cm8")];
    for id in 2..=5 {
        chain.push(Device::new(id, "iron-pi-io16"));
    }
    chain
}

use std::sync::Arc;
use std::thread::JoinHandle;

use gpiocdev::line::EdgeDetection;
use gpiocdev::request::Request;
use tracing::{debug, warn};

use crate::bus::SharedBus;
use crate::error::BusError;
use crate::wake::WakeHandle;

/// Which edge of the interrupt line signals "service me".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEdge {
    Rising,
    Falling,
}

/// A per-bus interrupt line.
#[derive(Debug, Clone)]
pub struct IrqConfig {
    /// GPIO character device, e.g. `/dev/gpiochip0`.
    pub chip: String,
    /// Line offset on the chip.
    pub line: u32,
    pub edge: IrqEdge,
}

/// Watch an interrupt line and translate edges into service requests.
///
/// The watcher thread does exactly two things per edge: mark the bus
/// pending and nudge the wake channel. It never touches device queues.
pub fn spawn_watcher(
    config: IrqConfig,
    bus: Arc<SharedBus>,
    wake: WakeHandle,
) -> Result<JoinHandle<()>, BusError> {
    let edge = match config.edge {
        IrqEdge::Rising => EdgeDetection::RisingEdge,
        IrqEdge::Falling => EdgeDetection::FallingEdge,
    };

    let request = Request::builder()
        .on_chip(&config.chip)
        .with_consumer("spihub")
        .with_line(config.line)
        .with_edge_detection(edge)
        .request()
        .map_err(|e| BusError::Irq {
            chip: config.chip.clone(),
            line: config.line,
            source: e,
        })?;

    debug!(
        chip = %config.chip,
        line = config.line,
        edge = ?config.edge,
        bus_id = bus.id(),
        "watching interrupt line"
    );

    let bus_id = bus.id();
    let handle = std::thread::Builder::new()
        .name(format!("spihub-irq-{bus_id}"))
        .spawn(move || loop {
            match request.read_edge_event() {
                Ok(_event) => {
                    bus.mark_pending();
                    wake.notify();
                }
                Err(err) => {
                    warn!(bus_id = bus.id(), error = %err, "interrupt read failed; watcher exiting");
                    return;
                }
            }
        })
        .map_err(|e| BusError::WatcherSpawn { bus_id, source: e })?;

    Ok(handle)
}

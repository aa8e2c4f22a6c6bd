//! Startup orchestration and the service loop's home.
//!
//! Startup order matters: the socket binds before any bus is touched so
//! early clients queue at the socket layer; each bus then gets its
//! transceiver, its optional interrupt watcher, and one detection pass; the
//! identity read and the cached device-list frame come last, after
//! detection has settled which devices exist.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spihub_bus::device::declared_chain;
use spihub_bus::irq::{spawn_watcher, IrqConfig};
use spihub_bus::service::{run_service, BusDriver};
use spihub_bus::wake::wake_channel;
use spihub_bus::{SharedBus, SpidevExchange};
use spihub_frame::ipc::{encode_devices_list, DeviceEntry, DevicesList};
use spihub_transport::HubSocket;
use tracing::info;

use crate::config::{resolve_buses, DEFAULT_GPIO_CHIP};
use crate::exit::{
    bus_error, config_error, identity_error, io_error, transport_error, CliError, CliResult,
    DATA_INVALID, INTERNAL,
};
use crate::identity::{read_identity, Identity};
use crate::server::{spawn_server, Broadcaster, HubShared};

pub struct BrokerOptions {
    pub bus_paths: Vec<PathBuf>,
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
}

/// Run the broker until shutdown. Any startup failure is fatal.
pub fn run(opts: &BrokerOptions) -> CliResult<()> {
    let bus_configs = resolve_buses(&opts.bus_paths, &opts.config_path, Path::new("/dev"))
        .map_err(|e| config_error("resolve buses", e))?;
    info!(buses = bus_configs.len(), "starting broker");

    let (wake, wake_rx) = wake_channel();
    let shared_buses: Vec<Arc<SharedBus>> = bus_configs
        .iter()
        .enumerate()
        .map(|(idx, _)| Arc::new(SharedBus::new(idx as u8, declared_chain())))
        .collect();
    let shared = Arc::new(HubShared::new(shared_buses.clone(), wake.clone()));

    let socket = HubSocket::bind(&opts.socket_path)
        .map_err(|e| transport_error("bind hub socket", e))?;
    spawn_server(socket, Arc::clone(&shared)).map_err(|e| io_error("spawn accept loop", e))?;

    let mut sink = Broadcaster::new(Arc::clone(&shared));
    let mut drivers = Vec::with_capacity(bus_configs.len());
    for (config, bus) in bus_configs.iter().zip(&shared_buses) {
        let xfer = SpidevExchange::open(&config.path, config.speed)
            .map_err(|e| bus_error("open bus", e))?;

        if let Some(line) = config.irq_pin {
            spawn_watcher(
                IrqConfig {
                    chip: DEFAULT_GPIO_CHIP.to_string(),
                    line,
                    edge: config.irq_edge(),
                },
                Arc::clone(bus),
                wake.clone(),
            )
            .map_err(|e| bus_error("register interrupt", e))?;
        }

        let mut driver = BusDriver::new(Arc::clone(bus), Box::new(xfer));
        driver
            .service_pass(true, &mut sink)
            .map_err(|e| bus_error("detection pass", e))?;
        drivers.push(driver);
    }

    let identity = read_identity().map_err(|e| identity_error("read identity", e))?;
    let list = devices_list(&shared_buses, &identity);
    let frame = encode_devices_list(&list)
        .map_err(|e| CliError::new(DATA_INVALID, format!("encode device list: {e}")))?;
    shared.set_devices_list(frame);
    info!(
        devices = list.devices.len(),
        serial_number = %list.serial_number,
        socket = %opts.socket_path.display(),
        "broker ready"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let wake = wake.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            wake.notify();
        })
        .map_err(|e| CliError::new(INTERNAL, format!("signal handler setup failed: {e}")))?;
    }

    run_service(&mut drivers, &wake_rx, &shutdown, &mut sink)
        .map_err(|e| bus_error("service loop", e))?;
    info!("broker shut down");
    Ok(())
}

/// The bootstrap document: every detected device on every bus, plus the
/// host identity.
pub fn devices_list(buses: &[Arc<SharedBus>], identity: &Identity) -> DevicesList {
    let mut devices = Vec::new();
    for bus in buses {
        let state = bus.lock();
        for device in state.devices() {
            devices.push(DeviceEntry {
                bus_id: bus.id(),
                device_id: device.id,
                device_info: device.info.clone(),
            });
        }
    }
    DevicesList {
        devices,
        serial_number: identity.serial_number.clone(),
        access_code: identity.access_code.clone(),
    }
}

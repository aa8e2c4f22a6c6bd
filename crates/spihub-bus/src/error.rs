/// Errors raised by the bus service loop and its peripherals.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Opening or configuring an SPI device node failed.
    #[error("failed to open SPI bus {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    /// A full-duplex exchange failed.
    #[error("SPI transfer failed on bus {bus_id}: {source}")]
    Transfer {
        bus_id: u8,
        source: std::io::Error,
    },

    /// Requesting the interrupt line failed.
    #[error("failed to request interrupt line {line} on {chip}: {source}")]
    Irq {
        chip: String,
        line: u32,
        source: gpiocdev::Error,
    },

    /// Spawning the interrupt watcher thread failed.
    #[error("failed to spawn interrupt watcher for bus {bus_id}: {source}")]
    WatcherSpawn {
        bus_id: u8,
        source: std::io::Error,
    },

    /// The service loop kept finding pending work past the restart cap.
    #[error("service loop restarted {restarts} times without draining; runaway producer")]
    RunawayService { restarts: u32 },
}

pub type Result<T> = std::result::Result<T, BusError>;

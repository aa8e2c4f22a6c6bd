use std::io;
use std::path::Path;

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use tracing::debug;

use crate::error::BusError;

/// A full-duplex fixed-length SPI exchange.
///
/// The seam between the service loop and the hardware: production uses
/// [`SpidevExchange`]; tests script responses.
pub trait SpiExchange: Send {
    /// Shift `tx` out while filling `rx` on the same clocks. The two slices
    /// are always the same length.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;
}

/// An SPI bus character device (`/dev/spidevX.Y`).
pub struct SpidevExchange {
    spi: Spidev,
}

impl SpidevExchange {
    /// Open and configure a bus device node at the given clock speed.
    pub fn open(path: impl AsRef<Path>, speed_hz: u32) -> Result<Self, BusError> {
        let path = path.as_ref();
        let mut spi = Spidev::open(path).map_err(|e| BusError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options).map_err(|e| BusError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), speed_hz, "opened SPI bus");
        Ok(Self { spi })
    }
}

impl SpiExchange for SpidevExchange {
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut transfer = SpidevTransfer::read_write(tx, rx);
        self.spi.transfer(&mut transfer)
    }
}

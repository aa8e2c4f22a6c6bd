use std::path::{Path, PathBuf};

use serde::Deserialize;
use spihub_bus::device::DEFAULT_BUS_SPEED_HZ;
use spihub_bus::irq::IrqEdge;
use tracing::debug;

/// Config file read when no bus paths are given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/spi-hub.json";

/// Where applications find the broker.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/socket-spi-hub";

/// GPIO character device the interrupt pins live on.
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    pub buses: Vec<BusConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    pub path: PathBuf,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub irq_pin: Option<u32>,
    #[serde(default)]
    pub irq_active: Option<IrqActive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrqActive {
    High,
    Low,
}

fn default_speed() -> u32 {
    DEFAULT_BUS_SPEED_HZ
}

impl BusConfig {
    /// A bus named on the command line: default speed, no interrupt.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            speed: DEFAULT_BUS_SPEED_HZ,
            irq_pin: None,
            irq_active: None,
        }
    }

    /// The interrupt edge this bus signals on. Active-low pins pull the line
    /// down, so service is requested on the falling edge.
    pub fn irq_edge(&self) -> IrqEdge {
        match self.irq_active {
            Some(IrqActive::Low) => IrqEdge::Falling,
            _ => IrqEdge::Rising,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to scan for bus device nodes: {0}")]
    Scan(std::io::Error),

    #[error("no SPI bus available")]
    NoBuses,
}

/// Decide which buses to open.
///
/// Paths given on the command line win; otherwise the config file, if
/// present; otherwise the first `spi*` entry under `dev_dir`.
pub fn resolve_buses(
    cli_paths: &[PathBuf],
    config_path: &Path,
    dev_dir: &Path,
) -> Result<Vec<BusConfig>, ConfigError> {
    if !cli_paths.is_empty() {
        debug!(count = cli_paths.len(), "bus paths from command line");
        return Ok(cli_paths.iter().map(BusConfig::from_path).collect());
    }

    if config_path.exists() {
        let text = std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        let config: HubConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source: e,
            })?;
        if config.buses.is_empty() {
            return Err(ConfigError::NoBuses);
        }
        debug!(count = config.buses.len(), path = %config_path.display(), "bus paths from config file");
        return Ok(config.buses);
    }

    first_spi_device(dev_dir).map(|bus| vec![bus])
}

/// The first `spi*` device node under `dev_dir`, in name order.
fn first_spi_device(dev_dir: &Path) -> Result<BusConfig, ConfigError> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dev_dir)
        .map_err(ConfigError::Scan)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("spi"))
        })
        .collect();
    names.sort();

    names
        .into_iter()
        .next()
        .map(BusConfig::from_path)
        .ok_or(ConfigError::NoBuses)
}

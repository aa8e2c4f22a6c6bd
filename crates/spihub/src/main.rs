use std::path::PathBuf;

use clap::Parser;

use spihub::broker::{self, BrokerOptions};
use spihub::config::{DEFAULT_CONFIG_PATH, DEFAULT_SOCKET_PATH};
use spihub::logging::{self, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "spihub",
    version,
    about = "SPI bus broker: shares the host's SPI device chains between local applications"
)]
struct Cli {
    /// SPI bus device nodes to open. Overrides the config file; with neither,
    /// the first /dev/spi* entry is used.
    #[arg(value_name = "BUS_PATH")]
    bus_paths: Vec<PathBuf>,

    /// Config file describing the buses.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Hub socket path applications connect to.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.log_level);

    let options = BrokerOptions {
        bus_paths: cli.bus_paths,
        config_path: cli.config,
        socket_path: cli.socket,
    };

    if let Err(err) = broker::run(&options) {
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }
}

/*!
 * bl
 * Connect a bluetooth headset and fix it when it does not connect
 */

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod bluetooth;
mod config;
mod error;
mod host;
mod patterns;
mod session;

use bluetooth::{BluetoothManager, ResetMethod};
use config::{DeviceConfig, CONFIG_EXAMPLE};
use error::{ActionError, EXIT_INTERRUPTED};
use host::SystemHost;

#[derive(Parser)]
#[command(name = "bl")]
#[command(about = "Manage a bluetooth headset and quickly fix it when it does not connect")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Device key from the config file (defaults to [Default] key)
    #[arg(short, long)]
    device: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for bluetoothctl to answer
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=86400))]
    timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Power on and connect (default)
    Go,
    /// Check whether the device is connected
    #[command(alias = "s")]
    Status,
    /// Power bluetooth on
    On,
    /// Power bluetooth off
    Off,
    /// Connect the device
    #[command(alias = "c")]
    Connect,
    /// Pair the device again, then connect
    #[command(alias = "f")]
    Fix,
    /// Reset bluetooth with one method
    Reset {
        #[arg(value_enum)]
        method: ResetMethod,
    },
    /// List configured devices
    #[command(alias = "l")]
    List,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("bl_cli={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))?;

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => config::default_path().ok_or_else(|| anyhow!("cannot determine the user config directory"))?,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
            interrupt.cancel();
        }
    });

    match run(&cli, &config_path, cancel).await {
        Ok(message) => {
            println!("{}", message);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_interrupt() => {
            println!("\nBye!");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(ActionError::Config(e)) => {
            eprintln!("{}", e);
            eprintln!(
                "\nCreate {} like this:\n\n{}",
                config_path.display(),
                CONFIG_EXAMPLE
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            debug!("{:?}", e);
            eprintln!("{}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

async fn run(cli: &Cli, config_path: &std::path::Path, cancel: CancellationToken) -> Result<String, ActionError> {
    let config = DeviceConfig::load(config_path)?;
    let command = cli.command.unwrap_or(Commands::Go);

    if command == Commands::List {
        return Ok(list_devices(&config));
    }

    let key = cli.device.as_deref().unwrap_or_else(|| config.default_key());
    let device = config.device(key)?;
    debug!(key, address = %device.address, "Selected device");

    let host = SystemHost::new(Duration::from_secs(cli.timeout), cancel);
    let manager = BluetoothManager::new(&host, &device);

    match command {
        Commands::Go => manager.go().await,
        Commands::Status => manager.status().await,
        Commands::On => manager.power(true).await,
        Commands::Off => manager.power(false).await,
        Commands::Connect => manager.connect().await,
        Commands::Fix => manager.fix().await,
        Commands::Reset { method } => manager.reset(method).await,
        Commands::List => Ok(list_devices(&config)),
    }
}

fn list_devices(config: &DeviceConfig) -> String {
    config
        .devices()
        .iter()
        .map(|device| {
            let marker = if device.key == config.default_key() { "*" } else { " " };
            format!("{} {:<10} {}  {}", marker, device.key, device.address, device.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

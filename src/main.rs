//! Simulated telemetry device - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use telemsim::config::DeviceConfig;
use telemsim::device::DeviceLifecycle;
use telemsim::identity::DeviceIdentity;
use telemsim::observability::init_default_logging;
use telemsim::session::mqtt::{SessionClient, TransportConfig};
use telemsim::telemetry::VehicleSimulator;
use tokio::signal;
use tracing::{error, info};

/// Simulated telemetry device
#[derive(Parser)]
#[command(name = "telemsim")]
#[command(about = "Simulated telemetry device publishing sensor readings over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting telemsim v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Device shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(DeviceConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = vec!["device.toml", "config/device.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(DeviceConfig::load_from_file(&path)?);
                }
            }

            error!(
                "No configuration file found. Please provide one with -c/--config or create device.toml"
            );
            process::exit(1);
        }
    }
}

async fn run_device(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Credential load failure is startup-fatal
    let identity = DeviceIdentity::from_config(&config)?;
    info!(
        client_id = %identity.client_id,
        endpoint = %config.mqtt.endpoint,
        "Device identity loaded"
    );

    let transport = TransportConfig::from_config(&config, identity);
    let session = SessionClient::new(&transport);
    let mut device = DeviceLifecycle::new(config, session, Box::new(VehicleSimulator::new()));

    device.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Device is running; publishing telemetry and listening for control messages...");

    let mut fatal_event = None;
    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        fatal = device.wait_fatal() => {
            fatal_event = fatal;
        }
    }

    device.shutdown().await;

    if let Some(event) = fatal_event {
        error!(topic = %event.topic, "Broker rejected a required subscription; exiting");
        return Err(event.to_string().into());
    }

    Ok(())
}

fn handle_config_command(
    config: DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

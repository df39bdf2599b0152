use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use tokio::sync::mpsc::UnboundedReceiver;

use sensor_board_monitor_lib::config::{AppConfig, CONFIG_FILE_NAME};
use sensor_board_monitor_lib::core::bluetooth::{DeviceEvent, DeviceIdentity, DeviceManager};
use sensor_board_monitor_lib::{logging, state::AppState, DeviceError};

#[derive(Parser)]
#[command(name = "sensor-board-monitor")]
#[command(about = "Connects to a multi-sensor BLE board and streams its decoded values")]
struct Cli {
    /// JSON settings file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby sensor boards
    Scan,
    /// Connect and print every event as a JSON line until Ctrl-C
    Monitor {
        /// Name or address fragment of the board; the strongest match is used
        device: Option<String>,
    },
    /// Print the board's configuration
    Config { device: Option<String> },
    /// Set the board clock to the host's time
    SyncClock { device: Option<String> },
    /// Write the default settings file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::init(level)?;

    if let Commands::InitConfig = cli.command {
        AppConfig::default().save_config(&cli.config).await?;
        return Ok(());
    }

    let config = AppConfig::load_config(&cli.config).await?;
    let auto_reconnect = config.connection.auto_reconnect;
    let mut state = AppState::new(config).await?;
    let manager = state.get_device_manager_arc();

    match cli.command {
        Commands::Scan => {
            for device in manager.scan().await? {
                println!("{}\t{}\t{} dBm", device.address, device.name, device.rssi);
            }
        }
        Commands::Monitor { device } => {
            let identity = pick_device(&manager, device.as_deref()).await?;
            let events = state
                .events
                .take()
                .ok_or_else(|| anyhow!("event stream already taken"))?;
            monitor(manager, identity, events, auto_reconnect).await?;
        }
        Commands::Config { device } => {
            let identity = pick_device(&manager, device.as_deref()).await?;
            manager.connect(&identity).await?;
            let result = manager.read_device_config().await;
            shutdown(&manager).await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::SyncClock { device } => {
            let identity = pick_device(&manager, device.as_deref()).await?;
            manager.connect(&identity).await?;
            let result = manager.sync_clock().await;
            shutdown(&manager).await;
            println!("{}", result?.formatted());
        }
        Commands::InitConfig => {}
    }

    Ok(())
}

async fn pick_device(manager: &DeviceManager, target: Option<&str>) -> Result<DeviceIdentity> {
    let devices = manager.scan().await?;
    let picked = match target {
        Some(target) => devices.into_iter().find(|d| d.matches(target)),
        None => devices.into_iter().next(),
    };
    picked.ok_or_else(|| match target {
        Some(target) => anyhow!("No sensor board matching {:?} found", target),
        None => anyhow!("No sensor board found"),
    })
}

async fn monitor(
    manager: Arc<DeviceManager>,
    identity: DeviceIdentity,
    mut events: UnboundedReceiver<DeviceEvent>,
    auto_reconnect: bool,
) -> Result<()> {
    let report = manager.connect(&identity).await?;
    info!("Connected: {}", serde_json::to_string(&report)?);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, disconnecting...");
                break Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                println!("{}", serde_json::to_string(&event)?);

                if event == (DeviceEvent::Stale { stale: true }) && auto_reconnect {
                    warn!("Session is stale, reconnecting...");
                    if let Err(e) = manager.reconnect().await {
                        error!("Reconnect failed: {}", e);
                        break Err(e.into());
                    }
                }
            }
        }
    };

    shutdown(&manager).await;
    outcome
}

async fn shutdown(manager: &DeviceManager) {
    match manager.disconnect().await {
        Ok(()) | Err(DeviceError::NotConnected) => {}
        Err(e) => warn!("Disconnect reported: {}", e),
    }
}

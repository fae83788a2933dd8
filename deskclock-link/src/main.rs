//! Deskclock Link daemon
//!
//! Loads the device config, starts every worker and runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use deskclock_link::config::DeviceConfig;
use deskclock_link::device::Device;
use deskclock_link::ingest::open_source;
use deskclock_link::link::InterfaceLink;
use deskclock_link::session::RumqttSession;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "deskclock-link", version, about = "Desk clock connectivity and telemetry link")]
struct Args {
    /// Config file (defaults to $DESKCLOCK_CONFIG, then the OS config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telegram source, overrides `serial.path`
    #[arg(short, long)]
    serial: Option<PathBuf>,

    /// Run without a telegram source
    #[arg(long)]
    no_serial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskclock_link=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = DeviceConfig::load(args.config.as_deref())
        .await
        .context("Failed to load config")?;
    if args.serial.is_some() {
        config.serial.path = args.serial;
    }

    info!(
        "Deskclock link starting (broker {}:{}, topic root {})",
        config.broker.host, config.broker.port, config.device.topic_root
    );

    let source = if args.no_serial {
        None
    } else {
        Some(
            open_source(&config.serial)
                .await
                .context("Failed to open telegram source")?,
        )
    };

    let session = RumqttSession::from_config(&config.broker, &config.session);
    let link = InterfaceLink::from_config(&config.link);
    let device = Device::new(config).context("Failed to open alarm table")?;
    let mut running = device.start(session, link, source);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Could not listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            Some(request) = running.playback.recv() => {
                info!("Song {} requested for the {:?} player", request.index, request.mode);
            }
            Some(slot) = running.ringing.recv() => {
                info!("Alarm {} is ringing", slot);
            }
        }
    }

    let stats = running.stats.snapshot();
    running.stop().await;
    info!(
        "Session summary: {} connect(s), {} reconnect(s), {} publish(es), {} command(s)",
        stats.connects, stats.reconnects, stats.publishes_sent, stats.commands_handled
    );
    Ok(())
}

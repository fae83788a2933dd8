//! Frame ingestion worker
//!
//! Reads the telegram byte stream, feeds the frame parser and commits every
//! valid sample to the store. Between reads it wakes every 10 ms so a frame
//! missing its terminator still completes after the silence gap.

use crate::config::SerialConfig;
use crate::frame::FrameParser;
use crate::telemetry::{SharedTelemetry, TelemetrySample};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub type ByteSource = Box<dyn AsyncRead + Unpin + Send>;

/// Opens the configured byte source, stdin when no path is set
pub async fn open_source(config: &SerialConfig) -> std::io::Result<ByteSource> {
    match &config.path {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            info!("Reading telegrams from {}", path.display());
            Ok(Box::new(file))
        }
        None => {
            info!("Reading telegrams from stdin");
            Ok(Box::new(tokio::io::stdin()))
        }
    }
}

fn commit(store: &SharedTelemetry, sample: TelemetrySample) {
    if sample.valid {
        debug!("Host sample: {:?}", sample);
        store.write_pc_sample(sample);
    } else {
        debug!("Frame without known fields ignored");
    }
}

/// Runs until the source closes or shutdown is requested
pub async fn run_ingestion<R: AsyncRead + Unpin + Send>(
    mut source: R,
    mut parser: FrameParser,
    store: SharedTelemetry,
    mut shutdown: watch::Receiver<bool>,
) -> FrameParser {
    let mut buf = [0u8; 64];

    loop {
        if let Some(sample) = parser.poll_idle_at(Instant::now().into_std()) {
            commit(&store, sample);
        }

        tokio::select! {
            read = source.read(&mut buf) => match read {
                Ok(0) => {
                    if let Some(sample) = parser.finish() {
                        commit(&store, sample);
                    }
                    info!("Telegram source closed");
                    break;
                }
                Ok(n) => {
                    let now = Instant::now().into_std();
                    for &byte in &buf[..n] {
                        if let Some(sample) = parser.feed_at(byte, now) {
                            commit(&store, sample);
                        }
                    }
                }
                Err(e) => {
                    warn!("Telegram read failed: {}", e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            },
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Ingestion worker stopping");
                    break;
                }
            }
        }
    }

    if parser.dropped_bytes() > 0 {
        warn!("{} telegram byte(s) dropped on overlong frames", parser.dropped_bytes());
    }
    parser
}

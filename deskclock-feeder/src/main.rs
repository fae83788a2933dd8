//! Host feeder for the desk clock
//!
//! Samples CPU, RAM and GPU once per interval and writes one telegram per
//! sample (`CCc 23 G45c12 RL61.5`) to the clock's serial line or stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use sysinfo::{Components, System};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Component labels that belong to a GPU
const GPU_LABELS: [&str; 4] = ["gpu", "amdgpu", "nvidia", "radeon"];

/// amdgpu exposes its load here; other drivers have no portable equivalent
const GPU_BUSY_PATH: &str = "/sys/class/drm/card0/device/gpu_busy_percent";

#[derive(Debug, Parser)]
#[command(name = "deskclock-feeder", version, about = "Feeds host load telegrams to the desk clock")]
struct Args {
    /// Serial device or file to write to (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds between two telegrams
    #[arg(short, long, default_value_t = 1)]
    interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HostSample {
    cpu_load: i32,
    /// Temperature and load
    gpu: Option<(i32, i32)>,
    ram_load: f32,
}

fn format_telegram(sample: &HostSample) -> String {
    match sample.gpu {
        Some((temp, load)) => format!(
            "CCc {} G{}c{} RL{:.1}\n",
            sample.cpu_load, temp, load, sample.ram_load
        ),
        None => format!("CCc {} RL{:.1}\n", sample.cpu_load, sample.ram_load),
    }
}

fn is_gpu_label(label: &str) -> bool {
    let label = label.to_lowercase();
    GPU_LABELS.iter().any(|gpu| label.contains(gpu))
}

struct HostSampler {
    sys: System,
    components: Components,
}

impl HostSampler {
    fn new() -> Self {
        let components = Components::new_with_refreshed_list();
        match components.iter().find(|c| is_gpu_label(c.label())) {
            Some(gpu) => info!("GPU temperature from component '{}'", gpu.label()),
            None => info!("No GPU temperature sensor found, GPU segment omitted"),
        }
        Self {
            sys: System::new(),
            components,
        }
    }

    fn sample(&mut self) -> HostSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.components.refresh();

        let cpu_load = self.sys.global_cpu_info().cpu_usage().round() as i32;
        let total = self.sys.total_memory() as f32;
        let used = self.sys.used_memory() as f32;
        let ram_load = if total > 0.0 { used / total * 100.0 } else { 0.0 };

        let gpu_temp = self
            .components
            .iter()
            .find(|c| is_gpu_label(c.label()))
            .map(|c| c.temperature().round() as i32);
        let gpu = gpu_temp.map(|temp| (temp, read_gpu_busy(Path::new(GPU_BUSY_PATH)).unwrap_or(0)));

        HostSample {
            cpu_load: cpu_load.clamp(0, 100),
            gpu,
            ram_load,
        }
    }
}

fn read_gpu_busy(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

async fn open_output(path: Option<&Path>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    match path {
        Some(path) => {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            info!("Writing telegrams to {}", path.display());
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskclock_feeder=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut output = open_output(args.output.as_deref()).await?;
    let mut sampler = HostSampler::new();
    let interval = Duration::from_secs(args.interval.max(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Feeder stopping");
                break;
            }
            _ = sleep(interval) => {
                let telegram = format_telegram(&sampler.sample());
                debug!("Telegram: {}", telegram.trim_end());
                if let Err(e) = output.write_all(telegram.as_bytes()).await {
                    warn!("Telegram not written: {}", e);
                    continue;
                }
                if let Err(e) = output.flush().await {
                    warn!("Flush failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

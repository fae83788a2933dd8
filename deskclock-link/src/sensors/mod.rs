//! Ambient sensor samplers
//!
//! One task per sensor, each the only writer of its telemetry field. A failed
//! reading keeps the previous value in the store.

use crate::telemetry::SharedTelemetry;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Components;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Room thermometer error value
const DISCONNECTED_C: f32 = -127.0;

/// Fixed resistor of the photoresistor divider
const R_FIXED_OHMS: f32 = 20_000.0;
/// Photoresistor resistance at 10 lux
const R10_OHMS: f32 = 8_000.0;
const GAMMA: f32 = 0.6;
const ADC_FULL_SCALE_V: f32 = 3.3;
const ADC_MAX_COUNT: f32 = 4095.0;
/// Raw counts averaged per light reading
const LIGHT_SAMPLES: usize = 16;

pub trait AmbientSensor: Send + 'static {
    fn name(&self) -> &str;
    /// One reading, `None` when the sensor could not be read
    fn sample(&mut self) -> Option<f32>;
}

/// Store field a sampler owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    AmbientTemp,
    AmbientLight,
    ControllerTemp,
}

/// Samples `sensor` every `period` until shutdown
pub async fn run_sampler<S: AmbientSensor>(
    mut sensor: S,
    field: SensorField,
    store: SharedTelemetry,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = sensor.name().to_string();
    info!("Sampling {} every {:?}", name, period);
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("{} sampler stopping", name);
                    break;
                }
                continue;
            }
        }

        // sysfs reads and component refreshes block, keep them off the runtime
        let reading = tokio::task::spawn_blocking(move || {
            let value = sensor.sample();
            (sensor, value)
        })
        .await;
        let value = match reading {
            Ok((returned, value)) => {
                sensor = returned;
                value
            }
            Err(e) => {
                warn!("{} sampler lost: {}", name, e);
                break;
            }
        };

        match value {
            Some(value) => match field {
                SensorField::AmbientTemp => store.write_ambient_temp(value),
                SensorField::AmbientLight => store.write_ambient_light(value),
                SensorField::ControllerTemp => store.write_controller_temp(value),
            },
            None => debug!("{}: no reading", name),
        }
    }
}

/// 1-Wire thermometer exposed through the kernel `w1_slave` file
pub struct W1Thermometer {
    path: PathBuf,
}

impl W1Thermometer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parses a `w1_slave` dump: CRC line ending in `YES`, then `t=<millidegrees>`
pub fn parse_w1_slave(content: &str) -> Option<f32> {
    let mut lines = content.lines();
    if !lines.next()?.trim_end().ends_with("YES") {
        return None;
    }
    let raw = lines.next()?.split("t=").nth(1)?.trim();
    let celsius = raw.parse::<i32>().ok()? as f32 / 1000.0;
    (celsius != DISCONNECTED_C).then_some(celsius)
}

impl AmbientSensor for W1Thermometer {
    fn name(&self) -> &str {
        "room thermometer"
    }

    fn sample(&mut self) -> Option<f32> {
        let content = read_sysfs(&self.path)?;
        parse_w1_slave(&content)
    }
}

/// Photoresistor divider on a 12-bit ADC channel, read from its raw count file
pub struct PhotoresistorLux {
    path: PathBuf,
}

impl PhotoresistorLux {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Converts an averaged raw ADC count into an illuminance estimate
pub fn lux_from_count(count: f32) -> Option<f32> {
    let volts = count * ADC_FULL_SCALE_V / ADC_MAX_COUNT;
    if volts <= 0.0 || volts >= ADC_FULL_SCALE_V {
        return None;
    }
    let resistance = volts * R_FIXED_OHMS / (ADC_FULL_SCALE_V - volts);
    let lux = (resistance / R10_OHMS).powf(1.0 / -GAMMA) * 10.0;
    lux.is_finite().then_some(lux)
}

impl AmbientSensor for PhotoresistorLux {
    fn name(&self) -> &str {
        "ambient light"
    }

    fn sample(&mut self) -> Option<f32> {
        let mut sum = 0.0;
        for _ in 0..LIGHT_SAMPLES {
            sum += read_sysfs(&self.path)?.trim().parse::<f32>().ok()?;
        }
        lux_from_count(sum / LIGHT_SAMPLES as f32)
    }
}

/// Die temperature of the board running the daemon
pub struct ControllerThermometer {
    components: Components,
    label: Option<String>,
}

impl ControllerThermometer {
    /// Uses the component whose label contains `label`, or the first one
    pub fn new(label: Option<String>) -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
            label,
        }
    }
}

impl AmbientSensor for ControllerThermometer {
    fn name(&self) -> &str {
        "controller temperature"
    }

    fn sample(&mut self) -> Option<f32> {
        self.components.refresh();
        let component = match &self.label {
            Some(label) => self.components.iter().find(|c| c.label().contains(label.as_str())),
            None => self.components.iter().next(),
        }?;
        let celsius = component.temperature();
        celsius.is_finite().then_some(celsius)
    }
}

fn read_sysfs(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            debug!("Could not read {}: {}", path.display(), e);
            None
        }
    }
}

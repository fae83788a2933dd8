//! Telemetry data model and the shared aggregate store
//!
//! The store is fed by several independent producers:
//! - the frame ingestion worker (host machine sample)
//! - one sampler per ambient sensor (light, room temperature, controller die)
//!
//! Each field has its own lock and exactly one writer. A snapshot copies the
//! fields one after the other, so it is never torn per field but may combine
//! values taken at slightly different moments.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Room thermometer value before the first successful reading
pub const AMBIENT_TEMP_DISCONNECTED: f32 = -127.0;

/// One host-machine status reading decoded from a telegram
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub cpu_load_pct: i32,
    /// Not carried by the current telegram format, kept for the report
    pub cpu_temp_c: i32,
    pub gpu_load_pct: i32,
    pub gpu_temp_c: i32,
    pub ram_load_pct: f32,
    pub valid: bool,
}

/// Full outbound report body, assembled at publish time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateTelemetry {
    pub pc: TelemetrySample,
    pub ambient_temp_c: f32,
    pub ambient_light_lux: f32,
    pub controller_temp_c: f32,
    pub report_sequence: u64,
}

/// Locked aggregate of every telemetry value
#[derive(Debug)]
pub struct TelemetryStore {
    pc: Mutex<TelemetrySample>,
    ambient_temp_c: Mutex<f32>,
    ambient_light_lux: Mutex<f32>,
    controller_temp_c: Mutex<f32>,
    report_sequence: AtomicU64,
}

pub type SharedTelemetry = Arc<TelemetryStore>;

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            pc: Mutex::new(TelemetrySample::default()),
            ambient_temp_c: Mutex::new(AMBIENT_TEMP_DISCONNECTED),
            ambient_light_lux: Mutex::new(0.0),
            controller_temp_c: Mutex::new(0.0),
            report_sequence: AtomicU64::new(0),
        }
    }

    pub fn shared() -> SharedTelemetry {
        Arc::new(Self::new())
    }

    pub fn write_pc_sample(&self, sample: TelemetrySample) {
        *self.pc.lock() = sample;
    }

    pub fn write_ambient_temp(&self, celsius: f32) {
        *self.ambient_temp_c.lock() = celsius;
    }

    pub fn write_ambient_light(&self, lux: f32) {
        *self.ambient_light_lux.lock() = lux;
    }

    pub fn write_controller_temp(&self, celsius: f32) {
        *self.controller_temp_c.lock() = celsius;
    }

    /// Last host sample, for display code that only needs the PC view
    pub fn pc_sample(&self) -> TelemetrySample {
        *self.pc.lock()
    }

    /// Bumps the report counter and returns the new value.
    ///
    /// Only the publisher calls this, once per report.
    pub fn advance_sequence(&self) -> u64 {
        self.report_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Copies every field, each under its own critical section
    pub fn snapshot(&self) -> AggregateTelemetry {
        let pc = *self.pc.lock();
        let ambient_temp_c = *self.ambient_temp_c.lock();
        let ambient_light_lux = *self.ambient_light_lux.lock();
        let controller_temp_c = *self.controller_temp_c.lock();

        AggregateTelemetry {
            pc,
            ambient_temp_c,
            ambient_light_lux,
            controller_temp_c,
            report_sequence: self.report_sequence.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

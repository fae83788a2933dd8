//! Periodic telemetry report
//!
//! One JSON object per tick, published at QoS 0 and never queued. A failed
//! publish is simply superseded by the next tick.

use crate::command::Topics;
use crate::error::SessionError;
use crate::session::BrokerSession;
use crate::telemetry::{AggregateTelemetry, TelemetryStore};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct Report<'a> {
    services: [ServiceReport<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ServiceReport<'a> {
    service_id: &'a str,
    properties: ReportProperties,
}

/// Property names follow the cloud product model
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReportProperties {
    temperature: f64,
    time: u64,
    lux: f64,
    #[serde(rename = "GPULoad")]
    gpu_load: i32,
    #[serde(rename = "CPULoad")]
    cpu_load: i32,
    #[serde(rename = "GPUTemp")]
    gpu_temp: i32,
    #[serde(rename = "CPUTemp")]
    cpu_temp: i32,
    #[serde(rename = "RAMLoad")]
    ram_load: f64,
    #[serde(rename = "ESP32Temp")]
    controller_temp: f64,
}

fn round_to(value: f32, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value as f64 * scale).round() / scale
}

pub struct TelemetryPublisher {
    report_topic: String,
    service_id: String,
}

impl TelemetryPublisher {
    pub fn new(topics: &Topics, service_id: impl Into<String>) -> Self {
        Self {
            report_topic: topics.report.clone(),
            service_id: service_id.into(),
        }
    }

    pub fn report_topic(&self) -> &str {
        &self.report_topic
    }

    /// Serializes a snapshot as report number `sequence`
    pub fn report_body(
        &self,
        telemetry: &AggregateTelemetry,
        sequence: u64,
    ) -> Result<String, serde_json::Error> {
        let pc = &telemetry.pc;
        let report = Report {
            services: [ServiceReport {
                service_id: &self.service_id,
                properties: ReportProperties {
                    temperature: round_to(telemetry.ambient_temp_c, 2),
                    time: sequence,
                    lux: round_to(telemetry.ambient_light_lux, 2),
                    gpu_load: pc.gpu_load_pct,
                    cpu_load: pc.cpu_load_pct,
                    gpu_temp: pc.gpu_temp_c,
                    cpu_temp: pc.cpu_temp_c,
                    ram_load: round_to(pc.ram_load_pct, 1),
                    controller_temp: round_to(telemetry.controller_temp_c, 1),
                },
            }],
        };
        serde_json::to_string(&report)
    }

    /// Snapshot, advance the sequence, publish once
    pub async fn publish_once<S: BrokerSession + ?Sized>(
        &self,
        session: &mut S,
        store: &TelemetryStore,
    ) -> Result<u64, SessionError> {
        let snapshot = store.snapshot();
        let sequence = store.advance_sequence();
        let body = self
            .report_body(&snapshot, sequence)
            .map_err(|e| SessionError::Encode(e.to_string()))?;

        session.publish(&self.report_topic, body.as_bytes()).await?;
        debug!("Report {} published", sequence);
        Ok(sequence)
    }
}

//! Device context
//!
//! Owns the telemetry store, the alarm table and the topic set, and starts one
//! task per worker:
//! - link polling
//! - telegram ingestion (when a source is given)
//! - one sampler per configured ambient sensor
//! - broker session, dispatch and reports
//! - alarm clock
//!
//! [`RunningDevice::stop`] flips the shutdown flag and joins every task.

use crate::actuators::{
    run_alarm_clock, ActuatorHub, AlarmBook, Jukebox, LedStrip, PlaybackRequest, SharedAlarms,
};
use crate::command::Topics;
use crate::config::DeviceConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::ActuatorError;
use crate::frame::FrameParser;
use crate::ingest::{run_ingestion, ByteSource};
use crate::link::{run_link_worker, LinkDriver, LinkStateMachine};
use crate::publisher::TelemetryPublisher;
use crate::sensors::{
    run_sampler, ControllerThermometer, PhotoresistorLux, SensorField, W1Thermometer,
};
use crate::session::{BrokerSession, SessionStats, SessionTiming, SessionWorker};
use crate::state::{new_state, Shutdown};
use crate::telemetry::{SharedTelemetry, TelemetryStore};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const ALARM_CHECK_PERIOD: Duration = Duration::from_secs(1);

pub struct Device {
    config: DeviceConfig,
    store: SharedTelemetry,
    alarms: SharedAlarms,
    topics: Topics,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self, ActuatorError> {
        let alarms = match &config.actuators.alarm_file {
            Some(path) => AlarmBook::open(path)?,
            None => AlarmBook::new(),
        };
        let topics = Topics::new(&config.device.topic_root);

        Ok(Self {
            config,
            store: TelemetryStore::shared(),
            alarms: new_state(alarms),
            topics,
        })
    }

    pub fn store(&self) -> SharedTelemetry {
        self.store.clone()
    }

    pub fn alarms(&self) -> SharedAlarms {
        self.alarms.clone()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Starts every worker; the session and link driver are injected
    pub fn start<S, D>(self, session: S, link_driver: D, source: Option<ByteSource>) -> RunningDevice
    where
        S: BrokerSession + 'static,
        D: LinkDriver + 'static,
    {
        let shutdown = Shutdown::new();
        let mut workers = Vec::new();
        let config = &self.config;

        // link
        let (link_tx, link_rx) = watch::channel(false);
        let link = new_state(LinkStateMachine::with_timing(
            link_driver,
            config.link.connect_timeout(),
            config.link.retry_delay(),
        ));
        workers.push((
            "link",
            tokio::spawn(run_link_worker(
                link,
                config.link.poll_interval(),
                link_tx,
                shutdown.subscribe(),
            )),
        ));

        // telegrams
        if let Some(source) = source {
            let parser = FrameParser::with_gap(Duration::from_millis(config.serial.frame_gap_ms));
            let ingestion = run_ingestion(source, parser, self.store.clone(), shutdown.subscribe());
            workers.push((
                "ingestion",
                tokio::spawn(async move {
                    ingestion.await;
                }),
            ));
        }

        // ambient sensors
        let sensors = &config.sensors;
        if let Some(path) = &sensors.ambient_temp_path {
            workers.push((
                "room thermometer",
                tokio::spawn(run_sampler(
                    W1Thermometer::new(path),
                    SensorField::AmbientTemp,
                    self.store.clone(),
                    Duration::from_millis(sensors.ambient_temp_period_ms),
                    shutdown.subscribe(),
                )),
            ));
        }
        if let Some(path) = &sensors.light_adc_path {
            workers.push((
                "ambient light",
                tokio::spawn(run_sampler(
                    PhotoresistorLux::new(path),
                    SensorField::AmbientLight,
                    self.store.clone(),
                    Duration::from_millis(sensors.light_period_ms),
                    shutdown.subscribe(),
                )),
            ));
        }
        workers.push((
            "controller temperature",
            tokio::spawn(run_sampler(
                ControllerThermometer::new(sensors.controller_label.clone()),
                SensorField::ControllerTemp,
                self.store.clone(),
                Duration::from_millis(sensors.controller_period_ms),
                shutdown.subscribe(),
            )),
        ));

        // actuators and session
        let (jukebox, playback) = Jukebox::new(config.actuators.song_count);
        let hub = ActuatorHub::new(
            LedStrip::new(config.actuators.led_count),
            self.alarms.clone(),
            jukebox,
        );
        let dispatcher = CommandDispatcher::new(self.topics.clone(), hub);
        let publisher = TelemetryPublisher::new(&self.topics, config.device.service_id.clone());
        let worker = SessionWorker::new(
            session,
            dispatcher,
            publisher,
            self.store.clone(),
            link_rx,
            SessionTiming::from(&config.session),
        );
        let stats = worker.stats();
        let session_shutdown = shutdown.subscribe();
        workers.push((
            "session",
            tokio::spawn(async move {
                worker.run(session_shutdown).await;
            }),
        ));

        // alarm clock
        let (ring_tx, ringing) = mpsc::unbounded_channel();
        workers.push((
            "alarm clock",
            tokio::spawn(run_alarm_clock(
                self.alarms.clone(),
                ALARM_CHECK_PERIOD,
                ring_tx,
                shutdown.subscribe(),
            )),
        ));

        info!("Device started with {} worker(s)", workers.len());
        RunningDevice {
            store: self.store,
            alarms: self.alarms,
            stats,
            playback,
            ringing,
            shutdown,
            workers,
        }
    }
}

pub struct RunningDevice {
    pub store: SharedTelemetry,
    pub alarms: SharedAlarms,
    pub stats: SessionStats,
    /// Songs the UI has to show
    pub playback: mpsc::UnboundedReceiver<PlaybackRequest>,
    /// Alarm slots that just rang
    pub ringing: mpsc::UnboundedReceiver<usize>,
    shutdown: Shutdown,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl RunningDevice {
    /// Signals every worker and waits for all of them
    pub async fn stop(self) {
        self.shutdown.trigger();
        for (name, handle) in self.workers {
            if let Err(e) = handle.await {
                warn!("Worker {} ended abnormally: {}", name, e);
            }
        }
        info!("All workers stopped");
    }
}

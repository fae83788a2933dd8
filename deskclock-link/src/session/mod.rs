//! Broker session worker
//!
//! One task owns the broker client and does everything that touches it:
//! - connect, retrying every 3 s forever (no permanent failure, unlike the link)
//! - resubscribe after every connect
//! - service the connection and dispatch inbound commands
//! - publish acknowledgements and the periodic report
//!
//! Broker connects are deferred while the network link is down.

pub mod mqtt;

pub use mqtt::RumqttSession;

use crate::config::SessionConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::SessionError;
use crate::publisher::TelemetryPublisher;
use crate::telemetry::SharedTelemetry;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pause between two service rounds
const IDLE_TICK: Duration = Duration::from_millis(10);

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Transport seam for the broker connection
#[async_trait]
pub trait BrokerSession: Send {
    fn is_connected(&self) -> bool;

    /// One bounded connect attempt
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError>;

    /// Drops the connection; the next loop pass connects again
    fn disconnect(&mut self);

    /// Drives the connection for a bounded time and returns what arrived
    async fn service_once(&mut self) -> Result<Vec<InboundMessage>, SessionError>;

    /// Fire-and-forget publish
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingForLink,
    Connecting,
    Connected,
    Disconnected,
}

/// Counters exposed by the session worker
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatsSnapshot {
    pub status: SessionStatus,
    pub uptime_seconds: u64,
    pub connect_attempts: u64,
    pub connects: u64,
    pub reconnects: u64,
    pub publishes_sent: u64,
    pub publishes_failed: u64,
    pub commands_handled: u64,
}

#[derive(Clone)]
pub struct SessionStats {
    start_time: std::time::Instant,
    status: Arc<Mutex<SessionStatus>>,
    connect_attempts: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
    publishes_sent: Arc<AtomicU64>,
    publishes_failed: Arc<AtomicU64>,
    commands_handled: Arc<AtomicU64>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            status: Arc::new(Mutex::new(SessionStatus::Connecting)),
            connect_attempts: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
            publishes_sent: Arc::new(AtomicU64::new(0)),
            publishes_failed: Arc::new(AtomicU64::new(0)),
            commands_handled: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        let connects = self.connects.load(Ordering::Relaxed);
        SessionStatsSnapshot {
            status: self.status(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects,
            reconnects: connects.saturating_sub(1),
            publishes_sent: self.publishes_sent.load(Ordering::Relaxed),
            publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing of the session loop
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub retry_delay: Duration,
    pub report_interval: Duration,
}

impl From<&SessionConfig> for SessionTiming {
    fn from(config: &SessionConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            report_interval: config.report_interval(),
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

pub struct SessionWorker<S> {
    session: S,
    dispatcher: CommandDispatcher,
    publisher: TelemetryPublisher,
    store: SharedTelemetry,
    link: watch::Receiver<bool>,
    timing: SessionTiming,
    stats: SessionStats,
}

impl<S: BrokerSession> SessionWorker<S> {
    pub fn new(
        session: S,
        dispatcher: CommandDispatcher,
        publisher: TelemetryPublisher,
        store: SharedTelemetry,
        link: watch::Receiver<bool>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            session,
            dispatcher,
            publisher,
            store,
            link,
            timing,
            stats: SessionStats::new(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Runs until the shutdown flag flips, then hands the session back
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> S {
        info!("Session worker started");
        let mut next_report = Instant::now() + self.timing.report_interval;
        let mut was_connected = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.session.is_connected() {
                if was_connected {
                    warn!("Broker session lost");
                    self.stats.set_status(SessionStatus::Disconnected);
                    was_connected = false;
                }

                if !*self.link.borrow() {
                    self.stats.set_status(SessionStatus::WaitingForLink);
                    if self.wait_for_link(&mut shutdown).await {
                        break;
                    }
                    continue;
                }

                if let Err(e) = self.establish().await {
                    warn!("Broker connect failed: {}, retrying in {:?}", e, self.timing.retry_delay);
                    self.stats.set_status(SessionStatus::Disconnected);
                    if pause(self.timing.retry_delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
                was_connected = true;
                next_report = Instant::now() + self.timing.report_interval;
            }

            self.service().await;

            if Instant::now() >= next_report {
                next_report += self.timing.report_interval;
                if next_report <= Instant::now() {
                    next_report = Instant::now() + self.timing.report_interval;
                }
                self.report().await;
            }

            if pause(IDLE_TICK, &mut shutdown).await {
                break;
            }
        }

        info!("Session worker stopped");
        self.session
    }

    async fn establish(&mut self) -> Result<(), SessionError> {
        self.stats.set_status(SessionStatus::Connecting);
        SessionStats::increment(&self.stats.connect_attempts);
        self.session.connect().await?;

        let topics = self.dispatcher.topics();
        let command_filter = topics.command_filter();
        let downstream = topics.downstream.clone();
        for filter in [&command_filter, &downstream] {
            if let Err(e) = self.session.subscribe(filter).await {
                // a session without its subscriptions never hears a command
                self.session.disconnect();
                return Err(e);
            }
        }

        SessionStats::increment(&self.stats.connects);
        self.stats.set_status(SessionStatus::Connected);
        info!("Broker session up, subscribed to {} and {}", command_filter, downstream);
        Ok(())
    }

    async fn service(&mut self) {
        let inbound = match self.session.service_once().await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Broker service error: {}", e);
                return;
            }
        };

        for message in inbound {
            let outcome = self.dispatcher.dispatch(&message.topic, &message.payload);
            let Some((topic, body)) = outcome.ack() else {
                continue;
            };
            SessionStats::increment(&self.stats.commands_handled);
            match self.session.publish(topic, body.as_bytes()).await {
                Ok(()) => SessionStats::increment(&self.stats.publishes_sent),
                Err(e) => {
                    SessionStats::increment(&self.stats.publishes_failed);
                    warn!("Acknowledgement to {} not sent: {}", topic, e);
                }
            }
        }
    }

    async fn report(&mut self) {
        if !self.session.is_connected() {
            return;
        }
        match self.publisher.publish_once(&mut self.session, &self.store).await {
            Ok(_) => SessionStats::increment(&self.stats.publishes_sent),
            Err(e) => {
                SessionStats::increment(&self.stats.publishes_failed);
                warn!("Report dropped: {}", e);
            }
        }
    }

    /// Waits for the link to come up; returns true on shutdown
    async fn wait_for_link(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        debug!("Network link down, deferring broker connect");
        tokio::select! {
            changed = self.link.changed() => {
                if changed.is_err() {
                    // link worker gone, fall back to the fixed retry spacing
                    return pause(self.timing.retry_delay, shutdown).await;
                }
                false
            }
            _ = tokio::time::sleep(self.timing.retry_delay) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}

/// Sleeps for `duration`; returns true if shutdown was requested meanwhile
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

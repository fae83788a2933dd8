//! Network link state machine
//!
//! Non-blocking association management:
//! - `Idle` / `FailedTemporary` → `Connecting` (retry only after the back-off)
//! - `Connecting` → `Connected` once the driver reports an association
//! - `Connecting` → `FailedTemporary` after the attempt timeout
//! - `Connecting` → `FailedPermanent` when the driver rejects the configuration
//! - `Connected` → `Idle` when the association is lost
//!
//! A permanent failure is never retried automatically; [`LinkStateMachine::reset`]
//! is the only way out. The broker session keeps its own never-give-up policy.

use crate::config::LinkConfig;
use crate::state::Shared;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

/// What the underlying transport says about the current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    Pending,
    Established,
    /// The configuration can never associate (bad credentials, wrong device)
    Rejected,
}

/// Underlying network transport; every call must return immediately
pub trait LinkDriver: Send {
    /// Starts an asynchronous association attempt
    fn begin(&mut self);
    fn association(&mut self) -> Association;
    /// Gives up on the current attempt
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { attempt_started_at: Instant },
    Connected,
    FailedTemporary { earliest_retry_at: Instant },
    FailedPermanent,
}

pub struct LinkStateMachine<D> {
    driver: D,
    state: LinkState,
    connect_timeout: Duration,
    retry_delay: Duration,
}

impl<D: LinkDriver> LinkStateMachine<D> {
    pub fn new(driver: D) -> Self {
        Self::with_timing(driver, CONNECT_TIMEOUT, RETRY_DELAY)
    }

    pub fn with_timing(driver: D, connect_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            driver,
            state: LinkState::Idle,
            connect_timeout,
            retry_delay,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    /// Advances the machine one step and reports whether the link is usable
    pub fn poll_at(&mut self, now: Instant) -> bool {
        match self.state {
            LinkState::Connected => {
                if self.driver.association() == Association::Established {
                    return true;
                }
                warn!("Network link lost, restarting association");
                self.state = LinkState::Idle;
                false
            }
            LinkState::Idle => {
                self.start_attempt(now);
                self.check_attempt(now, now)
            }
            LinkState::FailedTemporary { earliest_retry_at } => {
                if now < earliest_retry_at {
                    return false;
                }
                self.start_attempt(now);
                self.check_attempt(now, now)
            }
            LinkState::Connecting { attempt_started_at } => {
                self.check_attempt(attempt_started_at, now)
            }
            LinkState::FailedPermanent => false,
        }
    }

    /// Resolves the attempt in flight; only reached from `Connecting`
    fn check_attempt(&mut self, attempt_started_at: Instant, now: Instant) -> bool {
        match self.driver.association() {
            Association::Established => {
                info!("Network link established");
                self.state = LinkState::Connected;
                true
            }
            Association::Rejected => {
                warn!("Network link rejected the configuration, not retrying");
                self.driver.abort();
                self.state = LinkState::FailedPermanent;
                false
            }
            Association::Pending => {
                if now.saturating_duration_since(attempt_started_at) >= self.connect_timeout {
                    warn!(
                        "Network link attempt timed out after {:?}, retrying in {:?}",
                        self.connect_timeout, self.retry_delay
                    );
                    self.driver.abort();
                    self.state = LinkState::FailedTemporary {
                        earliest_retry_at: now + self.retry_delay,
                    };
                }
                false
            }
        }
    }

    /// Leaves a permanent failure; the next poll starts over
    pub fn reset(&mut self) {
        if self.state == LinkState::FailedPermanent {
            info!("Network link reset after permanent failure");
        }
        self.state = LinkState::Idle;
    }

    fn start_attempt(&mut self, now: Instant) {
        debug!("Starting network association attempt");
        self.driver.begin();
        self.state = LinkState::Connecting { attempt_started_at: now };
    }
}

/// Link machine shared between the link worker and anyone who wants to poll it
pub type SharedLink<D> = Shared<LinkStateMachine<D>>;

/// Polls the link periodically and mirrors the up/down state on a watch channel
pub async fn run_link_worker<D: LinkDriver + 'static>(
    link: SharedLink<D>,
    period: Duration,
    status: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let up = link.lock().poll();
                status.send_if_modified(|current| {
                    let changed = *current != up;
                    *current = up;
                    changed
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Link worker stopping");
                    break;
                }
            }
        }
    }
}

/// Host link driver watching a network interface
pub struct InterfaceLink {
    interface: Option<String>,
}

impl InterfaceLink {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.interface.clone())
    }
}

impl LinkDriver for InterfaceLink {
    fn begin(&mut self) {
        match &self.interface {
            Some(name) => info!("Waiting for interface {} to come up", name),
            None => info!("Waiting for any non-loopback interface to come up"),
        }
    }

    fn association(&mut self) -> Association {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(list) => list,
            Err(e) => {
                debug!("Interface enumeration failed: {}", e);
                return Association::Pending;
            }
        };

        match &self.interface {
            Some(name) => {
                let matching: Vec<_> = interfaces.iter().filter(|i| &i.name == name).collect();
                if matching.iter().any(|i| i.is_loopback()) {
                    Association::Rejected
                } else if matching.is_empty() {
                    Association::Pending
                } else {
                    Association::Established
                }
            }
            None if interfaces.iter().any(|i| !i.is_loopback()) => Association::Established,
            None => Association::Pending,
        }
    }

    fn abort(&mut self) {
        debug!("Abandoning interface wait");
    }
}

//! Alarm table
//!
//! Ten fixed slots. An upsert past the last used slot grows the table; the
//! "triggered today" mark is cleared on every write and on every day change.
//! When a file is configured the table is rewritten as JSON after each change.

use super::AlarmSchedule;
use crate::error::ActuatorError;
use crate::state::Shared;
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const MAX_ALARMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSetting {
    pub hour: u8,
    pub minute: u8,
    /// Bit 0 is Sunday
    pub days_of_week: u8,
    pub enabled: bool,
    #[serde(default)]
    pub triggered_today: bool,
}

impl AlarmSetting {
    fn rings_on(&self, weekday: u8) -> bool {
        weekday < 7 && self.days_of_week & (1 << weekday) != 0
    }
}

#[derive(Debug, Default)]
pub struct AlarmBook {
    slots: [Option<AlarmSetting>; MAX_ALARMS],
    used: usize,
    file: Option<PathBuf>,
    last_checked_day: Option<u8>,
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a persisted table; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ActuatorError> {
        let path = path.into();
        let mut book = Self {
            file: Some(path.clone()),
            ..Self::default()
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let stored: Vec<Option<AlarmSetting>> = serde_json::from_str(&content)?;
            for (slot, alarm) in book.slots.iter_mut().zip(stored) {
                *slot = alarm;
            }
            book.used = book
                .slots
                .iter()
                .rposition(Option::is_some)
                .map_or(0, |last| last + 1);
            info!("Loaded {} alarm slot(s) from {}", book.used, path.display());
        }
        Ok(book)
    }

    /// Number of slots in use, counting gaps below the highest one
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn get(&self, slot: usize) -> Option<&AlarmSetting> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Slots that ring at this minute; each rings at most once per day
    pub fn due(&mut self, weekday: u8, hour: u8, minute: u8) -> Result<Vec<usize>, ActuatorError> {
        let mut changed = false;

        if self.last_checked_day != Some(weekday) {
            for alarm in self.slots.iter_mut().flatten() {
                alarm.triggered_today = false;
            }
            self.last_checked_day = Some(weekday);
            changed = true;
        }

        let mut ringing = Vec::new();
        for (slot, alarm) in self.slots[..self.used].iter_mut().enumerate() {
            let Some(alarm) = alarm else { continue };
            if alarm.enabled
                && !alarm.triggered_today
                && alarm.rings_on(weekday)
                && alarm.hour == hour
                && alarm.minute == minute
            {
                alarm.triggered_today = true;
                ringing.push(slot);
                changed = true;
            }
        }

        if changed {
            self.save()?;
        }
        Ok(ringing)
    }

    fn save(&self) -> Result<(), ActuatorError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.slots)?;
        std::fs::write(path, content)?;
        debug!("Alarm table written to {}", path.display());
        Ok(())
    }
}

impl AlarmSchedule for AlarmBook {
    fn upsert(
        &mut self,
        slot: usize,
        hour: u8,
        minute: u8,
        day_mask: u8,
        enabled: bool,
    ) -> Result<(), ActuatorError> {
        if slot >= MAX_ALARMS {
            return Err(ActuatorError::OutOfRange { index: slot, max: MAX_ALARMS });
        }
        if hour > 23 || minute > 59 {
            return Err(ActuatorError::InvalidTime { hour, minute });
        }

        self.used = self.used.max(slot + 1);
        self.slots[slot] = Some(AlarmSetting {
            hour,
            minute,
            days_of_week: day_mask,
            enabled,
            triggered_today: false,
        });
        info!(
            "Alarm {} set to {:02}:{:02} (days {:#09b}, {})",
            slot,
            hour,
            minute,
            day_mask,
            if enabled { "on" } else { "off" }
        );
        self.save()
    }
}

/// Alarm table shared by the dispatcher and the alarm clock worker
pub type SharedAlarms = Shared<AlarmBook>;

impl AlarmSchedule for SharedAlarms {
    fn upsert(
        &mut self,
        slot: usize,
        hour: u8,
        minute: u8,
        day_mask: u8,
        enabled: bool,
    ) -> Result<(), ActuatorError> {
        self.lock().upsert(slot, hour, minute, day_mask, enabled)
    }
}

/// Checks the table against local time and reports each ringing slot
pub async fn run_alarm_clock(
    alarms: SharedAlarms,
    period: Duration,
    ringing: mpsc::UnboundedSender<usize>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Local::now();
                let due = alarms.lock().due(
                    now.weekday().num_days_from_sunday() as u8,
                    now.hour() as u8,
                    now.minute() as u8,
                );
                match due {
                    Ok(slots) => {
                        for slot in slots {
                            info!("Alarm {} ringing", slot);
                            if ringing.send(slot).is_err() {
                                debug!("Nobody listening for alarm {}", slot);
                            }
                        }
                    }
                    Err(e) => warn!("Alarm check failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Alarm clock stopping");
                    break;
                }
            }
        }
    }
}

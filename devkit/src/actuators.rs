/*!
Recording actuators

Stands in for the LED strip, the alarm table and the audio player at once and
records every call as the request that caused it.
*/

use deskclock_link::actuators::{ActuatorHub, AlarmSchedule, AudioPlayer, LedDriver, Rgb};
use deskclock_link::command::{ActuatorRequest, PlaybackMode};
use deskclock_link::error::ActuatorError;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct RecordingActuators {
    calls: Arc<Mutex<Vec<ActuatorRequest>>>,
    refuse: Arc<Mutex<bool>>,
}

impl RecordingActuators {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub whose three collaborators all record into this instance
    pub fn hub(&self) -> ActuatorHub {
        ActuatorHub::new(self.clone(), self.clone(), self.clone())
    }

    pub fn calls(&self) -> Vec<ActuatorRequest> {
        self.calls.lock().clone()
    }

    /// Makes every later call fail after being recorded
    pub fn refuse_all(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    fn record(&self, request: ActuatorRequest) -> Result<(), ActuatorError> {
        log::info!("[MOCK] Actuator request {:?}", request);
        self.calls.lock().push(request);
        if *self.refuse.lock() {
            return Err(ActuatorError::UiUnavailable);
        }
        Ok(())
    }
}

impl LedDriver for RecordingActuators {
    fn set_single(&mut self, index: usize, color: Rgb) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::LedSingle {
            index,
            r: color.r,
            g: color.g,
            b: color.b,
        })
    }

    fn set_all(&mut self, color: Rgb) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::LedAll {
            r: color.r,
            g: color.g,
            b: color.b,
        })
    }

    fn rainbow(&mut self, speed_ms: u16) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::LedRainbow { speed: speed_ms })
    }

    fn off(&mut self) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::LedOff)
    }
}

impl AlarmSchedule for RecordingActuators {
    fn upsert(
        &mut self,
        slot: usize,
        hour: u8,
        minute: u8,
        day_mask: u8,
        enabled: bool,
    ) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::AlarmUpsert {
            slot,
            hour,
            minute,
            day_mask,
            enabled,
        })
    }
}

impl AudioPlayer for RecordingActuators {
    fn play(&mut self, index: usize, mode: PlaybackMode) -> Result<(), ActuatorError> {
        self.record(ActuatorRequest::PlaySong { index, mode })
    }
}

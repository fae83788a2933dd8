//! Actuator collaborators driven by decoded commands
//!
//! Each actuator serializes its own overlapping requests; the dispatcher only
//! hands over one [`ActuatorRequest`] at a time.

pub mod alarm;
pub mod audio;
pub mod led;

pub use alarm::{run_alarm_clock, AlarmBook, AlarmSetting, SharedAlarms, MAX_ALARMS};
pub use audio::{Jukebox, PlaybackRequest};
pub use led::{wheel, LedStrip, Rgb};

use crate::command::{ActuatorRequest, PlaybackMode};
use crate::error::ActuatorError;

pub trait LedDriver: Send {
    fn set_single(&mut self, index: usize, color: Rgb) -> Result<(), ActuatorError>;
    fn set_all(&mut self, color: Rgb) -> Result<(), ActuatorError>;
    /// Starts the colour-wheel animation, one step every `speed_ms`
    fn rainbow(&mut self, speed_ms: u16) -> Result<(), ActuatorError>;
    fn off(&mut self) -> Result<(), ActuatorError>;
}

pub trait AlarmSchedule: Send {
    fn upsert(
        &mut self,
        slot: usize,
        hour: u8,
        minute: u8,
        day_mask: u8,
        enabled: bool,
    ) -> Result<(), ActuatorError>;
}

pub trait AudioPlayer: Send {
    fn play(&mut self, index: usize, mode: PlaybackMode) -> Result<(), ActuatorError>;
}

/// The set of collaborators a dispatcher routes requests to
pub struct ActuatorHub {
    pub leds: Box<dyn LedDriver>,
    pub alarms: Box<dyn AlarmSchedule>,
    pub audio: Box<dyn AudioPlayer>,
}

impl ActuatorHub {
    pub fn new(
        leds: impl LedDriver + 'static,
        alarms: impl AlarmSchedule + 'static,
        audio: impl AudioPlayer + 'static,
    ) -> Self {
        Self {
            leds: Box::new(leds),
            alarms: Box::new(alarms),
            audio: Box::new(audio),
        }
    }

    /// Hands one request to the collaborator that owns it
    pub fn apply(&mut self, request: ActuatorRequest) -> Result<(), ActuatorError> {
        match request {
            ActuatorRequest::LedSingle { index, r, g, b } => {
                self.leds.set_single(index, Rgb::new(r, g, b))
            }
            ActuatorRequest::LedAll { r, g, b } => self.leds.set_all(Rgb::new(r, g, b)),
            ActuatorRequest::LedRainbow { speed } => self.leds.rainbow(speed),
            ActuatorRequest::LedOff => self.leds.off(),
            ActuatorRequest::AlarmUpsert { slot, hour, minute, day_mask, enabled } => {
                self.alarms.upsert(slot, hour, minute, day_mask, enabled)
            }
            ActuatorRequest::PlaySong { index, mode } => self.audio.play(index, mode),
        }
    }
}

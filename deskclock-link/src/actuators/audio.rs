//! Song playback
//!
//! Background playback starts here. Foreground and lite playback need the
//! display, so those requests are handed over to the UI side on a channel.

use super::AudioPlayer;
use crate::command::PlaybackMode;
use crate::error::ActuatorError;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// Song hand-off for the UI worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackRequest {
    pub index: usize,
    pub mode: PlaybackMode,
}

pub struct Jukebox {
    song_count: usize,
    ui: mpsc::UnboundedSender<PlaybackRequest>,
    background: Option<usize>,
}

impl Jukebox {
    /// Returns the jukebox and the receiving end the UI worker listens on
    pub fn new(song_count: usize) -> (Self, mpsc::UnboundedReceiver<PlaybackRequest>) {
        let (ui, requests) = mpsc::unbounded_channel();
        let jukebox = Self {
            song_count,
            ui,
            background: None,
        };
        (jukebox, requests)
    }

    pub fn song_count(&self) -> usize {
        self.song_count
    }

    /// Song currently playing without UI
    pub fn background_song(&self) -> Option<usize> {
        self.background
    }
}

impl AudioPlayer for Jukebox {
    fn play(&mut self, index: usize, mode: PlaybackMode) -> Result<(), ActuatorError> {
        if index >= self.song_count {
            return Err(ActuatorError::OutOfRange { index, max: self.song_count });
        }

        match mode {
            PlaybackMode::Background => {
                info!("Playing song {} in background", index);
                self.background = Some(index);
                Ok(())
            }
            PlaybackMode::Foreground | PlaybackMode::Lite => {
                self.background = None;
                self.ui
                    .send(PlaybackRequest { index, mode })
                    .map_err(|_| ActuatorError::UiUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_playback_is_local() {
        let (mut jukebox, mut ui) = Jukebox::new(12);
        jukebox.play(3, PlaybackMode::Background).unwrap();
        assert_eq!(jukebox.background_song(), Some(3));
        assert!(ui.try_recv().is_err());
    }

    #[test]
    fn test_ui_modes_are_handed_over() {
        let (mut jukebox, mut ui) = Jukebox::new(12);
        jukebox.play(5, PlaybackMode::Lite).unwrap();
        jukebox.play(6, PlaybackMode::Foreground).unwrap();

        assert_eq!(ui.try_recv().unwrap(), PlaybackRequest { index: 5, mode: PlaybackMode::Lite });
        assert_eq!(
            ui.try_recv().unwrap(),
            PlaybackRequest { index: 6, mode: PlaybackMode::Foreground }
        );
    }

    #[test]
    fn test_index_is_validated() {
        let (mut jukebox, _ui) = Jukebox::new(2);
        assert!(matches!(
            jukebox.play(2, PlaybackMode::Background),
            Err(ActuatorError::OutOfRange { index: 2, max: 2 })
        ));
    }

    #[test]
    fn test_closed_ui_is_reported() {
        let (mut jukebox, ui) = Jukebox::new(4);
        drop(ui);
        assert!(matches!(
            jukebox.play(1, PlaybackMode::Foreground),
            Err(ActuatorError::UiUnavailable)
        ));
    }
}

//! Addressable LED strip
//!
//! Static colours are written straight into the frame buffer. The rainbow
//! animation runs on its own thread; every other call stops and joins it first,
//! then blanks the strip, so a new colour never races an animation step.
//! The thread parks between steps and is unparked on stop.

use super::LedDriver;
use crate::error::ActuatorError;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_LED_COUNT: usize = 10;

/// Animation position wraps after five trips round the wheel
const RAINBOW_CYCLE: usize = 256 * 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Position on the 0..=255 colour wheel: red → green → blue → red
pub fn wheel(position: u8) -> Rgb {
    let pos = 255 - position;
    match pos {
        0..=84 => Rgb::new(255 - pos * 3, 0, pos * 3),
        85..=169 => {
            let pos = pos - 85;
            Rgb::new(0, pos * 3, 255 - pos * 3)
        }
        _ => {
            let pos = pos - 170;
            Rgb::new(pos * 3, 255 - pos * 3, 0)
        }
    }
}

struct Animation {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct LedStrip {
    pixels: Arc<Mutex<Vec<Rgb>>>,
    animation: Option<Animation>,
}

impl LedStrip {
    pub fn new(count: usize) -> Self {
        Self {
            pixels: Arc::new(Mutex::new(vec![Rgb::OFF; count])),
            animation: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current frame buffer
    pub fn pixels(&self) -> Vec<Rgb> {
        self.pixels.lock().clone()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    fn stop_animation(&mut self) {
        let Some(animation) = self.animation.take() else {
            return;
        };
        animation.stop.store(true, Ordering::Relaxed);
        animation.handle.thread().unpark();
        if animation.handle.join().is_err() {
            warn!("Rainbow animation thread panicked");
        }
        self.pixels.lock().fill(Rgb::OFF);
        debug!("Rainbow animation stopped");
    }
}

impl Default for LedStrip {
    fn default() -> Self {
        Self::new(DEFAULT_LED_COUNT)
    }
}

impl Drop for LedStrip {
    fn drop(&mut self) {
        self.stop_animation();
    }
}

impl LedDriver for LedStrip {
    fn set_single(&mut self, index: usize, color: Rgb) -> Result<(), ActuatorError> {
        self.stop_animation();
        let mut pixels = self.pixels.lock();
        let max = pixels.len();
        let pixel = pixels
            .get_mut(index)
            .ok_or(ActuatorError::OutOfRange { index, max })?;
        *pixel = color;
        Ok(())
    }

    fn set_all(&mut self, color: Rgb) -> Result<(), ActuatorError> {
        self.stop_animation();
        self.pixels.lock().fill(color);
        Ok(())
    }

    fn rainbow(&mut self, speed_ms: u16) -> Result<(), ActuatorError> {
        self.stop_animation();

        let stop = Arc::new(AtomicBool::new(false));
        let pixels = self.pixels.clone();
        let period = Duration::from_millis(speed_ms.max(1) as u64);
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("led-rainbow".into())
            .spawn(move || {
                let mut step = 0usize;
                while !thread_stop.load(Ordering::Relaxed) {
                    {
                        let mut frame = pixels.lock();
                        let count = frame.len().max(1);
                        for (i, pixel) in frame.iter_mut().enumerate() {
                            *pixel = wheel(((i * 256 / count + step) & 255) as u8);
                        }
                    }
                    step = (step + 1) % RAINBOW_CYCLE;
                    thread::park_timeout(period);
                }
            })?;

        info!("Rainbow animation started ({} ms per step)", speed_ms);
        self.animation = Some(Animation { stop, handle });
        Ok(())
    }

    fn off(&mut self) -> Result<(), ActuatorError> {
        self.stop_animation();
        self.pixels.lock().fill(Rgb::OFF);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_primaries() {
        assert_eq!(wheel(0), Rgb::new(255, 0, 0));
        assert_eq!(wheel(85), Rgb::new(0, 255, 0));
        assert_eq!(wheel(170), Rgb::new(0, 0, 255));
    }

    #[test]
    fn test_set_single_and_range() {
        let mut strip = LedStrip::new(4);
        strip.set_single(2, Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(strip.pixels()[2], Rgb::new(1, 2, 3));
        assert_eq!(strip.pixels()[0], Rgb::OFF);

        let err = strip.set_single(4, Rgb::new(9, 9, 9)).unwrap_err();
        assert!(matches!(err, ActuatorError::OutOfRange { index: 4, max: 4 }));
        assert!(!strip.pixels().contains(&Rgb::new(9, 9, 9)));
    }

    #[test]
    fn test_static_colour_stops_animation() {
        let mut strip = LedStrip::new(DEFAULT_LED_COUNT);
        strip.rainbow(1).unwrap();
        assert!(strip.is_animating());
        thread::sleep(Duration::from_millis(20));

        strip.set_all(Rgb::new(10, 20, 30)).unwrap();
        assert!(!strip.is_animating());

        // joined thread can no longer overwrite the frame
        thread::sleep(Duration::from_millis(20));
        assert!(strip.pixels().iter().all(|p| *p == Rgb::new(10, 20, 30)));
    }

    #[test]
    fn test_slow_animation_stops_promptly() {
        let mut strip = LedStrip::new(3);
        strip.rainbow(u16::MAX).unwrap();
        let started = std::time::Instant::now();
        strip.off().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_rainbow_restart_replaces_animation() {
        let mut strip = LedStrip::new(3);
        strip.rainbow(5).unwrap();
        strip.rainbow(7).unwrap();
        assert!(strip.is_animating());
        strip.off().unwrap();
        assert!(!strip.is_animating());
        assert!(strip.pixels().iter().all(|p| *p == Rgb::OFF));
    }
}

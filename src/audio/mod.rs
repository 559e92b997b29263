//! Audio playback and metering.
//!
//! The frame loop only sees [`LevelMeter`]: a loudness reading in decibels
//! that can be queried at any time, independent of frame cadence.

pub mod meter;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use meter::{Meter, MIN_DECIBELS};

#[cfg(not(target_arch = "wasm32"))]
pub use native::AudioPlayer;
#[cfg(target_arch = "wasm32")]
pub use web::WebAudioPlayer as AudioPlayer;

pub trait LevelMeter {
    /// Smoothed loudness of what is playing right now, in decibels.
    fn current_level(&mut self) -> f32;
}

/// Stand-in when playback could not start; reads as silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentMeter;

impl LevelMeter for SilentMeter {
    fn current_level(&mut self) -> f32 {
        MIN_DECIBELS
    }
}

impl<M: LevelMeter + ?Sized> LevelMeter for Box<M> {
    fn current_level(&mut self) -> f32 {
        (**self).current_level()
    }
}

/// Start looping playback of `path`, falling back to silence on failure.
pub fn start_or_silent(path: &str, smoothing: f32) -> Box<dyn LevelMeter> {
    match AudioPlayer::start(path, smoothing) {
        Ok(player) => {
            tracing::info!("playing {} on loop", path);
            Box::new(player)
        }
        Err(e) => {
            tracing::error!("audio unavailable, continuing silent: {e}");
            Box::new(SilentMeter)
        }
    }
}

use std::collections::VecDeque;

/// Floor for the reported level; silence would otherwise be `-inf` dB.
pub const MIN_DECIBELS: f32 = -100.0;

/// Samples the RMS is taken over.
pub const DEFAULT_WINDOW: usize = 256;

/// Loudness meter over the most recent samples of a signal.
///
/// Each reading takes the RMS of the window and holds peaks with an
/// exponential decay: `rms = max(rms_now, rms_prev * smoothing)`.
#[derive(Debug, Clone)]
pub struct Meter {
    window: VecDeque<f32>,
    capacity: usize,
    smoothing: f32,
    rms: f32,
}

impl Meter {
    pub fn new(smoothing: f32) -> Self {
        Self::with_window(smoothing, DEFAULT_WINDOW)
    }

    pub fn with_window(smoothing: f32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            smoothing: smoothing.clamp(0.0, 1.0),
            rms: 0.0,
        }
    }

    /// Feed samples; only the last `capacity` are kept.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.capacity);
        for &s in &samples[skip..] {
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(s);
        }
    }

    fn window_rms(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.window.iter().map(|s| s * s).sum();
        (sum_sq / self.window.len() as f32).sqrt()
    }

    /// Current level in decibels, floored at [`MIN_DECIBELS`].
    pub fn level(&mut self) -> f32 {
        self.rms = self.window_rms().max(self.rms * self.smoothing);
        gain_to_db(self.rms)
    }
}

pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        return MIN_DECIBELS;
    }
    (20.0 * gain.log10()).max(MIN_DECIBELS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect()
    }

    #[test]
    fn silence_reads_floor() {
        let mut meter = Meter::new(0.8);
        assert_eq!(meter.level(), MIN_DECIBELS);
        meter.push_samples(&[0.0; 512]);
        assert_eq!(meter.level(), MIN_DECIBELS);
    }

    #[test]
    fn full_scale_sine_is_about_minus_three_db() {
        let mut meter = Meter::with_window(0.0, 4410);
        meter.push_samples(&sine(1.0, 44100));
        let db = meter.level();
        assert!((db - (-3.01)).abs() < 0.05, "level was {db}");
    }

    #[test]
    fn constant_signal_reads_its_gain() {
        let mut meter = Meter::new(0.8);
        meter.push_samples(&[0.5; 256]);
        assert!((meter.level() - gain_to_db(0.5)).abs() < 1e-4);
    }

    #[test]
    fn level_decays_by_smoothing_after_signal_stops() {
        let mut meter = Meter::new(0.8);
        meter.push_samples(&[1.0; 256]);
        assert!(meter.level().abs() < 1e-5);
        meter.push_samples(&[0.0; 256]);
        let expected = gain_to_db(0.8);
        assert!((meter.level() - expected).abs() < 1e-4);
        let expected = gain_to_db(0.64);
        assert!((meter.level() - expected).abs() < 1e-4);
    }

    #[test]
    fn window_keeps_only_latest_samples() {
        let mut meter = Meter::with_window(0.0, 4);
        meter.push_samples(&[1.0; 10]);
        meter.push_samples(&[0.0; 4]);
        assert_eq!(meter.level(), MIN_DECIBELS);
    }
}

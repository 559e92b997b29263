use std::cell::Cell;
use std::rc::Rc;

/// Monotonic wall time in milliseconds.
pub trait TimeSource {
    fn now_ms(&self) -> f64;
}

/// Elapsed time between successive samples.
pub struct Clock {
    source: Box<dyn TimeSource>,
    last: Option<f64>,
}

impl Clock {
    pub fn new(source: impl TimeSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            last: None,
        }
    }

    /// Seconds since the previous call; the first call starts the clock and returns 0.
    pub fn get_delta(&mut self) -> f32 {
        let now = self.source.now_ms();
        let dt = match self.last {
            Some(last) => ((now - last) / 1000.0).max(0.0) as f32,
            None => 0.0,
        };
        self.last = Some(now);
        dt
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub struct InstantSource {
    start: std::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl InstantSource {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for InstantSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl TimeSource for InstantSource {
    fn now_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// `performance.now()`, or `Date.now()` where the Performance API is missing.
#[cfg(target_arch = "wasm32")]
pub struct PerformanceSource {
    performance: Option<web_sys::Performance>,
}

#[cfg(target_arch = "wasm32")]
impl PerformanceSource {
    pub fn new(window: &web_sys::Window) -> Self {
        Self {
            performance: window.performance(),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl TimeSource for PerformanceSource {
    fn now_ms(&self) -> f64 {
        match &self.performance {
            Some(p) => p.now(),
            None => js_sys::Date::now(),
        }
    }
}

/// Hand-driven time, for headless runs and tests.
#[derive(Clone, Default)]
pub struct ManualTime(Rc<Cell<f64>>);

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_secs(&self, secs: f64) {
        self.0.set(self.0.get() + secs * 1000.0);
    }

    pub fn set_ms(&self, ms: f64) {
        self.0.set(ms);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> f64 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_zero() {
        let time = ManualTime::new();
        time.set_ms(5000.0);
        let mut clock = Clock::new(time.clone());
        assert_eq!(clock.get_delta(), 0.0);
    }

    #[test]
    fn delta_is_time_since_previous_sample() {
        let time = ManualTime::new();
        let mut clock = Clock::new(time.clone());
        clock.get_delta();
        time.advance_secs(0.25);
        assert!((clock.get_delta() - 0.25).abs() < 1e-6);
        assert_eq!(clock.get_delta(), 0.0);
        time.advance_secs(0.5);
        assert!((clock.get_delta() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn time_going_backwards_reads_zero() {
        let time = ManualTime::new();
        time.set_ms(1000.0);
        let mut clock = Clock::new(time.clone());
        clock.get_delta();
        time.set_ms(500.0);
        assert_eq!(clock.get_delta(), 0.0);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn instant_source_is_monotonic() {
        let source = InstantSource::new();
        let a = source.now_ms();
        let b = source.now_ms();
        assert!(b >= a);
    }
}

//! Jittered exponential backoff driving the reconnection loop.

use std::time::Duration;

/// Delay generator: `min * factor^attempts`, optionally jittered, clamped
/// into `[min, max]`. Each [`Backoff::duration`] call consumes one attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: u64,
    max: u64,
    factor: u64,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    /// Durations are in milliseconds. `jitter` must be in `[0, 1)` and
    /// `factor` at least 1; a `max` below `min` is coerced up to `min`.
    pub fn new(min: u64, max: u64, factor: u64, jitter: f64) -> Self {
        assert!((0.0..1.0).contains(&jitter), "jitter must be in [0, 1)");
        assert!(factor >= 1, "factor must be at least 1");
        Self {
            min,
            max: max.max(min),
            factor,
            jitter,
            attempts: 0,
        }
    }

    /// The next delay. Consecutive calls are non-decreasing up to the cap
    /// when no jitter is configured.
    pub fn duration(&mut self) -> Duration {
        let mut ms = self.min as f64 * (self.factor as f64).powi(self.attempts as i32);
        if self.jitter > 0.0 {
            let rand: f64 = rand::random();
            let deviation = rand * self.jitter * ms;
            if rand::random::<bool>() {
                ms += deviation;
            } else {
                ms -= deviation;
            }
        }
        let ms = ms.clamp(self.min as f64, self.max as f64) as u64;
        self.attempts += 1;
        Duration::from_millis(ms)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_min(&mut self, min: u64) {
        self.min = min;
        self.max = self.max.max(min);
    }

    pub fn set_max(&mut self, max: u64) {
        self.max = max.max(self.min);
    }

    pub fn set_jitter(&mut self, jitter: f64) {
        assert!((0.0..1.0).contains(&jitter), "jitter must be in [0, 1)");
        self.jitter = jitter;
    }
}

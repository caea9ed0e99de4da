use super::Clock;
use rand::Rng;

/// Forward-only clock wrapper.
///
/// Every reading is the true reading plus a random increment in
/// `[0, max_jitter)`, bumped past the previous reading when the source stalls
/// or goes backwards.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    clock: Clock,
    max_jitter: f64,
    last: Option<f64>,
}

impl MonotonicClock {
    pub fn new(clock: Clock, max_jitter: f64) -> Self {
        Self {
            clock,
            max_jitter: if max_jitter.is_finite() { max_jitter.max(0.0) } else { 0.0 },
            last: None,
        }
    }

    /// Turn a raw reading from the wrapped source into the next value
    pub fn next(&mut self, raw: f64) -> f64 {
        let raw = if raw.is_finite() {
            raw
        } else {
            self.last.unwrap_or(0.0)
        };

        let jitter = if self.max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..self.max_jitter)
        } else {
            0.0
        };

        let mut value = self.clock.quantize(raw + jitter);
        if let Some(last) = self.last {
            if value <= last {
                value = self.clock.quantize(last + self.clock.step() + jitter);
            }
        }

        self.last = Some(value);
        value
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

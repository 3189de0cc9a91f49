use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic time source in floating-point milliseconds. The scheduler only
/// ever compares and subtracts these values, so any stable origin works.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction time.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for deterministic tests. Cloned handles share the same
/// underlying time, so a test can keep one handle and hand another to the
/// scheduler.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        self.now_ms.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now_ms.get()
    }
}

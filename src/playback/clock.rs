//! Time sources and cancellation for the polling loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
use std::sync::atomic::AtomicU64;

/// Sleep between two iterations of a polling loop.
pub const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Monotonic time source driving a polling loop.
pub trait Clock: Send {
    /// Time elapsed since the clock's own origin.
    fn now(&self) -> Duration;

    /// Yields between two polls.
    fn idle(&self);
}

/// Wall-clock time, yielding with a short sleep.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn idle(&self) {
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Virtual time that only moves when a loop idles.
///
/// Clones share the same time line.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SteppingClock {
    nanos: Arc<AtomicU64>,
    step: u64,
}

#[cfg(test)]
impl SteppingClock {
    pub fn new(step: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            step: step.as_nanos() as u64,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn idle(&self) {
        self.nanos.fetch_add(self.step, Ordering::SeqCst);
        std::thread::yield_now();
    }
}

/// Single-writer, multi-reader stop flag shared by the loops of one session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

//! Time source and bounded polling
//!
//! All waiting in wpharness is synchronous: a loop that attempts something,
//! sleeps, and gives up once a budget is spent. The clock is injectable so
//! tests can run those loops against virtual time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;

/// Source of time used by polling loops
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: sleeping advances time instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(Mutex::new(ManualClockState::default())),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.inner.lock().elapsed += duration;
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.inner.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Repeatedly run `attempt` until it yields a value or `budget` is spent.
///
/// `Ok(Some(_))` ends the loop, `Ok(None)` sleeps `interval` and tries again,
/// `Err(_)` aborts immediately. Returns `Ok(None)` on timeout. At least one
/// attempt is always made, even with a zero budget.
pub fn poll_until<T, F>(
    clock: &dyn Clock,
    budget: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Result<Option<T>>,
{
    let started = clock.now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(value) = attempt()? {
            trace!("poll succeeded after {} attempt(s)", attempts);
            return Ok(Some(value));
        }

        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed >= budget {
            trace!("poll gave up after {} attempt(s) ({:?})", attempts, elapsed);
            return Ok(None);
        }

        clock.sleep(interval.min(budget - elapsed));
    }
}

//! Monotonic clock.
//!
//! `fetch()` samples the injected [`ClockSource`] once; `now()` returns the
//! cached sample. The work loop calls `fetch()` exactly once per tick so
//! every decision inside that tick observes the same instant, the
//! canonical tick time.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Injectable monotonic time source. The real implementation samples the
/// OS monotonic clock; tests and simulations substitute a deterministic
/// one.
pub trait ClockSource {
    fn now_ns(&self) -> i64;
}

/// `ClockSource` backed by `std::time::Instant`.
pub struct MonotonicClockSource {
    epoch: Instant,
}

impl Default for MonotonicClockSource {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl ClockSource for MonotonicClockSource {
    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }
}

/// Cached clock sample, shared by `Rc` (the agent is single-threaded)
/// across every component that reads the canonical tick time.
#[derive(Clone)]
pub struct Clock {
    source: Rc<dyn ClockSource>,
    cached_ns: Rc<Cell<i64>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::with_source(Rc::new(MonotonicClockSource::default()))
    }

    pub fn with_source(source: Rc<dyn ClockSource>) -> Self {
        let cached_ns = source.now_ns();
        Self {
            source,
            cached_ns: Rc::new(Cell::new(cached_ns)),
        }
    }

    /// Sample the time source and cache the result. Call exactly once per
    /// tick, at the top of `Agent::do_work`.
    pub fn fetch(&self) -> i64 {
        let now = self.source.now_ns();
        self.cached_ns.set(now);
        now
    }

    /// Return the cached sample from the most recent `fetch()`.
    pub fn now(&self) -> i64 {
        self.cached_ns.get()
    }

    /// Pin the cached sample without touching the source. Intended for
    /// tests and deterministic simulation harnesses.
    pub fn set_for_test(&self, ns: i64) {
        self.cached_ns.set(ns);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Cell<i64>);

    impl ClockSource for FixedSource {
        fn now_ns(&self) -> i64 {
            self.0.get()
        }
    }

    #[test]
    fn now_returns_cached_sample_until_next_fetch() {
        let source = Rc::new(FixedSource(Cell::new(1_000)));
        let clock = Clock::with_source(source.clone());
        assert_eq!(clock.now(), 1_000);
        source.0.set(2_000);
        // now() still sees the cached value...
        assert_eq!(clock.now(), 1_000);
        // ...until fetch() samples again.
        assert_eq!(clock.fetch(), 2_000);
        assert_eq!(clock.now(), 2_000);
    }
}

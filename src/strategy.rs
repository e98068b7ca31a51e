//! Publication strategy engine.
//!
//! A closed, runtime-discriminated sum type rather than a trait object:
//! keeps the registry's element type (`PublicationConfig`, in
//! `publication.rs`) a plain stack value and every decision allocation-free,
//! the same tradeoff `knhk-kernel` makes for its hot-path dispatch tables.

/// `-1` marks "never published" / "no schedule yet" throughout this
/// module, the `last_published_ns = -1` convention used by every
/// registered `PublicationConfig`.
pub const NEVER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PublishStrategy {
    /// Publish exactly once per property update per stream.
    OnUpdate,
    /// Publish at least once every `interval` nanoseconds; first
    /// publication is immediate.
    Periodic(i64),
    /// One-shot publication at an absolute deadline.
    Scheduled(i64),
    /// `OnUpdate` with a floor: only re-publish an update if at least
    /// `min_interval` nanoseconds have passed since the last publish.
    RateLimited(i64),
}

impl PublishStrategy {
    /// should_publish: per-strategy gating rule.
    pub fn should_publish(&self, last_pub: i64, next_sched: i64, prop_ts: i64, now: i64) -> bool {
        match *self {
            PublishStrategy::OnUpdate => prop_ts == now && last_pub != prop_ts,
            PublishStrategy::Periodic(interval) => {
                last_pub < 0 || (last_pub != now && now - last_pub >= interval)
            }
            PublishStrategy::Scheduled(at) => now >= at && last_pub != now && {
                let _ = next_sched;
                true
            },
            PublishStrategy::RateLimited(min_interval) => {
                prop_ts == now && (last_pub < 0 || now - last_pub >= min_interval)
            }
        }
    }

    /// next_time: the `next_scheduled_ns` to store after a
    /// publication (or at registration time, with `now = 0`).
    pub fn next_time(&self, now: i64) -> i64 {
        match *self {
            PublishStrategy::OnUpdate => NEVER,
            PublishStrategy::Periodic(interval) => now + interval,
            PublishStrategy::Scheduled(at) => at,
            PublishStrategy::RateLimited(min_interval) => now + min_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PublishStrategy::OnUpdate, -1, -1, 100, 100, true; "on_update fires when prop just changed")]
    #[test_case(PublishStrategy::OnUpdate, 100, -1, 100, 100, false; "on_update does not re-fire same tick")]
    #[test_case(PublishStrategy::OnUpdate, 50, -1, 40, 100, false; "on_update ignores stale prop timestamp")]
    #[test_case(PublishStrategy::Periodic(10), -1, 0, 0, 0, true; "periodic first publish is immediate")]
    #[test_case(PublishStrategy::Periodic(10), 0, 10, 0, 9, false; "periodic not yet due")]
    #[test_case(PublishStrategy::Periodic(10), 0, 10, 0, 10, true; "periodic due at interval boundary")]
    #[test_case(PublishStrategy::Periodic(10), 10, 20, 0, 10, false; "periodic already published this tick")]
    #[test_case(PublishStrategy::Scheduled(500), -1, 500, 0, 400, false; "scheduled before deadline")]
    #[test_case(PublishStrategy::Scheduled(500), -1, 500, 0, 500, true; "scheduled at deadline")]
    #[test_case(PublishStrategy::Scheduled(500), 500, 500, 0, 500, false; "scheduled already published this tick")]
    #[test_case(PublishStrategy::RateLimited(100), -1, 100, 50, 50, true; "rate limited first update publishes")]
    #[test_case(PublishStrategy::RateLimited(100), 0, 100, 50, 50, false; "rate limited floor not elapsed")]
    #[test_case(PublishStrategy::RateLimited(100), 0, 100, 100, 100, true; "rate limited floor elapsed")]
    #[test_case(PublishStrategy::RateLimited(100), 0, 100, 40, 100, false; "rate limited no update this tick")]
    fn should_publish_matrix(
        strategy: PublishStrategy,
        last_pub: i64,
        next_sched: i64,
        prop_ts: i64,
        now: i64,
        expected: bool,
    ) {
        assert_eq!(strategy.should_publish(last_pub, next_sched, prop_ts, now), expected);
    }

    #[test]
    fn periodic_next_time_strictly_increases() {
        let s = PublishStrategy::Periodic(10);
        assert!(s.next_time(100) > 90);
        assert_eq!(s.next_time(100), 110);
    }

    #[test]
    fn rate_limited_next_time_strictly_increases() {
        let s = PublishStrategy::RateLimited(50);
        assert_eq!(s.next_time(100), 150);
    }

    #[test]
    fn scheduled_next_time_is_constant() {
        let s = PublishStrategy::Scheduled(777);
        assert_eq!(s.next_time(0), 777);
        assert_eq!(s.next_time(1_000_000), 777);
    }

    #[test]
    fn on_update_next_time_is_never() {
        assert_eq!(PublishStrategy::OnUpdate.next_time(123), NEVER);
    }

    proptest::proptest! {
        /// Invariant: for `Periodic`/`RateLimited`, whenever
        /// `should_publish` returns true, `next_time(now)` is strictly
        /// greater than the previous `next_scheduled_ns`.
        #[test]
        fn periodic_next_time_always_strictly_exceeds_previous(
            interval in 1i64..100_000,
            now in 0i64..1_000_000,
        ) {
            let s = PublishStrategy::Periodic(interval);
            let next = s.next_time(now);
            proptest::prop_assert!(next > now);
        }

        #[test]
        fn rate_limited_next_time_always_strictly_exceeds_previous(
            interval in 1i64..100_000,
            now in 0i64..1_000_000,
        ) {
            let s = PublishStrategy::RateLimited(interval);
            let next = s.next_time(now);
            proptest::prop_assert!(next > now);
        }
    }
}

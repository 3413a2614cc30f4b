//! Token-bucket rate gate.
//!
//! The bucket holds up to `burst` tokens and refills continuously at `rate`
//! tokens per second, measured on the injected clock. `allow` never waits:
//! it either spends a token or reports that none is available.
//!
//! Token counts are kept as integers so that many small refills add up to
//! exactly the same amount as one large one. Rates are resolved to a
//! millionth of a token per second.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use sluice_core::{Clock, RealClock};

/// Bucket units per token: nanoseconds times micro-tokens per second.
const UNITS_PER_TOKEN: u128 = 1_000_000_000 * 1_000_000;

#[derive(Debug)]
struct Bucket {
    units: u128,
    last_refill: Instant,
}

/// Admission-rate limiter shared by every request handler.
#[derive(Debug)]
pub struct RateGate {
    rate: f64,
    micro_rate: u128,
    capacity: u128,
    bucket: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

impl RateGate {
    /// Creates a full bucket driven by the system clock.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::with_clock(rate, burst, Arc::new(RealClock::new()))
    }

    /// Creates a full bucket driven by `clock`.
    ///
    /// Negative or non-finite rates are treated as zero, which makes `burst`
    /// a one-time allowance. A zero burst starts empty and refills to at
    /// most one token.
    pub fn with_clock(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 0.0 };
        // Float-to-int casts saturate, so huge rates clamp instead of wrapping.
        let micro_rate = (rate * 1_000_000.0).round() as u128;
        let burst = u128::from(burst);
        let bucket = Bucket { units: burst * UNITS_PER_TOKEN, last_refill: clock.now() };

        Self {
            rate,
            micro_rate,
            capacity: burst.max(1) * UNITS_PER_TOKEN,
            bucket: Mutex::new(bucket),
            clock,
        }
    }

    /// Spends one token if one is available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.refilled();
        if bucket.units >= UNITS_PER_TOKEN {
            bucket.units -= UNITS_PER_TOKEN;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        self.refilled().units as f64 / UNITS_PER_TOKEN as f64
    }

    /// Configured refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn refilled(&self) -> std::sync::MutexGuard<'_, Bucket> {
        let now = self.clock.now();
        let mut bucket = self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !elapsed.is_zero() {
            let refill = elapsed.as_nanos().saturating_mul(self.micro_rate);
            bucket.units = bucket.units.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }
        bucket
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, sync::atomic::Ordering, time::Duration};

    use proptest::prelude::*;
    use sluice_core::TestClock;

    use super::*;

    fn gate(rate: f64, burst: u32) -> (RateGate, TestClock) {
        let clock = TestClock::new();
        (RateGate::with_clock(rate, burst, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn burst_is_available_immediately() {
        let (gate, _) = gate(2.0, 3);

        assert!(gate.allow());
        assert!(gate.allow());
        assert!(gate.allow());
        assert!(!gate.allow());
    }

    #[test]
    fn refills_at_configured_rate() {
        let (gate, clock) = gate(2.0, 3);
        for _ in 0..3 {
            gate.allow();
        }

        clock.advance(Duration::from_millis(500));

        assert!(gate.allow());
        assert!(!gate.allow());
    }

    #[test]
    fn polling_while_waiting_refills_exactly_one_token() {
        let (gate, clock) = gate(10.0, 1);
        assert!(gate.allow());

        for _ in 0..9 {
            clock.advance(Duration::from_millis(10));
            assert!(!gate.allow());
        }
        clock.advance(Duration::from_millis(10));

        assert!(gate.allow());
        assert!(!gate.allow());
    }

    #[test]
    fn fine_grained_polling_matches_one_long_wait() {
        let (gate, clock) = gate(3.0, 1);
        assert!(gate.allow());

        // 1/3 s, rounded up to the next nanosecond, over 1000 polls.
        for _ in 0..999 {
            clock.advance(Duration::from_nanos(333_333));
            assert!(!gate.allow());
        }
        clock.advance(Duration::from_nanos(333_667));

        assert!(gate.allow());
        assert!(!gate.allow());
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let (gate, clock) = gate(100.0, 2);
        clock.advance(Duration::from_secs(60));

        assert_eq!(gate.available(), 2.0);
    }

    #[test]
    fn zero_rate_makes_burst_a_one_time_allowance() {
        let (gate, clock) = gate(0.0, 2);
        assert!(gate.allow());
        assert!(gate.allow());

        clock.advance(Duration::from_secs(3600));

        assert!(!gate.allow());
    }

    #[test]
    fn zero_burst_starts_empty_and_holds_one_token() {
        let (gate, clock) = gate(1.0, 0);
        assert!(!gate.allow());

        clock.advance(Duration::from_secs(10));

        assert!(gate.allow());
        assert!(!gate.allow());
    }

    #[test]
    fn invalid_rates_are_treated_as_zero() {
        assert_eq!(gate(-5.0, 1).0.rate(), 0.0);
        assert_eq!(gate(f64::NAN, 1).0.rate(), 0.0);
        assert_eq!(gate(f64::INFINITY, 1).0.rate(), 0.0);
    }

    #[test]
    fn concurrent_callers_never_overspend() {
        let (gate, _) = gate(0.0, 50);
        let allowed = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if gate.allow() {
                            allowed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::Relaxed), 50);
    }

    proptest! {
        #[test]
        fn allowed_never_exceeds_burst_plus_refill(
            rate in 0u32..50,
            burst in 0u32..20,
            steps in prop::collection::vec((0u64..500, 0usize..10), 1..30),
        ) {
            let (gate, clock) = gate(f64::from(rate), burst);
            let mut allowed = 0u64;
            let mut elapsed_ms = 0u64;

            for (advance_ms, calls) in steps {
                clock.advance(Duration::from_millis(advance_ms));
                elapsed_ms += advance_ms;
                for _ in 0..calls {
                    if gate.allow() {
                        allowed += 1;
                    }
                }
            }

            let ceiling = f64::from(burst.max(1)) + f64::from(rate) * elapsed_ms as f64 / 1000.0;
            prop_assert!(allowed as f64 <= ceiling, "allowed {} > ceiling {}", allowed, ceiling);
        }
    }
}

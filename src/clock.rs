use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// A wall clock whose readings are nudged by a signed millisecond offset.
///
/// The signer (§4.1) must not trust the device's own clock: a device with a
/// clock that has drifted enough will produce a `X-Amz-Date` outside AWS's
/// five-minute signing window and every connection attempt will be refused.
/// The lifecycle controller owns the only writer to this offset (fed from a
/// server-advertised time, e.g. an HTTP `Date` header observed during an
/// earlier handshake); the signer only ever reads it.
#[derive(Clone, Debug)]
pub struct SkewCorrectedClock {
    offset_millis: Arc<AtomicI64>,
}

impl SkewCorrectedClock {
    pub fn new() -> Self {
        Self {
            offset_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Record a fresh estimate of `true_time - device_time`, in milliseconds.
    pub fn set_offset(&self, offset_millis: i64) {
        self.offset_millis.store(offset_millis, Ordering::Relaxed);
    }

    /// Derive an offset from an authoritative timestamp observed "now" and
    /// apply it immediately.
    pub fn correct_against(&self, authoritative_now: DateTime<Utc>) {
        let device_now = Utc::now();
        let offset = authoritative_now.signed_duration_since(device_now);
        self.set_offset(offset.num_milliseconds());
    }

    pub fn now(&self) -> DateTime<Utc> {
        let offset = self.offset_millis.load(Ordering::Relaxed);
        Utc::now() + Duration::milliseconds(offset)
    }
}

impl Default for SkewCorrectedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_offset_matches_system_clock_within_a_second() {
        let clock = SkewCorrectedClock::new();
        let delta = (clock.now() - Utc::now()).num_milliseconds().abs();
        assert!(delta < 1000);
    }

    #[test]
    fn positive_offset_shifts_time_forward() {
        let clock = SkewCorrectedClock::new();
        clock.set_offset(60_000);
        let delta = (clock.now() - Utc::now()).num_milliseconds();
        assert!(delta > 55_000 && delta < 65_000);
    }

    #[test]
    fn correct_against_converges_to_the_authoritative_time() {
        let clock = SkewCorrectedClock::new();
        let authoritative = Utc::now() + Duration::minutes(10);
        clock.correct_against(authoritative);
        let delta = (clock.now() - authoritative).num_milliseconds().abs();
        assert!(delta < 1000);
    }
}

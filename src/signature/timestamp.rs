use crate::clock::SkewCorrectedClock;
use chrono::{DateTime, Utc};

/// A single signing-time snapshot, captured once per `V4SigBuilder` so every
/// query parameter and the canonical request itself agree on the same
/// instant even if building the signature takes a few milliseconds.
pub struct Timestamp {
    at: DateTime<Utc>,
}

impl Timestamp {
    pub fn new(clock: &SkewCorrectedClock) -> Self {
        Timestamp { at: clock.now() }
    }

    /// `YYYYMMDD'T'HHMMSS'Z'`, the `X-Amz-Date` / string-to-sign timestamp.
    pub fn x_amz_date(&self) -> String {
        self.at.format("%Y%m%dT%H%M%SZ").to_string()
    }

    /// `YYYYMMDD`, used to derive the signing key and the credential scope.
    pub fn date_stamp(&self) -> String {
        self.at.format("%Y%m%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_match_sigv4_expectations() {
        let clock = SkewCorrectedClock::new();
        let fixed = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        clock.correct_against(fixed);
        let ts = Timestamp::new(&clock);
        assert_eq!(ts.x_amz_date(), "20150830T123600Z");
        assert_eq!(ts.date_stamp(), "20150830");
    }
}

//! Staleness policy: decides whether a stored recommendation must be regenerated.
//!
//! The stored `generated_at` timestamp is the only memoization key. There is no
//! separate "already refreshed" bookkeeping anywhere in the process.

use chrono::{DateTime, Duration, Utc};

/// Minimum age before a recommendation is regenerated. Zero means "always".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshInterval(Duration);

impl RefreshInterval {
    /// Negative, NaN and infinite hour counts collapse to zero.
    pub fn from_hours(hours: f64) -> Self {
        if !hours.is_finite() || hours <= 0.0 {
            return Self(Duration::zero());
        }
        let millis = (hours * 3_600_000.0).round();
        // Anything beyond chrono's range is effectively "never stale".
        let millis = millis.min(i64::MAX as f64 / 1_000.0) as i64;
        Self(Duration::milliseconds(millis))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

/// Returns true when the recommendation generated at `generated_at` needs regeneration.
pub fn is_stale(
    generated_at: Option<DateTime<Utc>>,
    interval: RefreshInterval,
    now: DateTime<Utc>,
) -> bool {
    let Some(generated_at) = generated_at else {
        return true;
    };
    if interval.is_zero() {
        return true;
    }
    now.signed_duration_since(generated_at) >= interval.as_duration()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_missing_recommendation_is_always_stale() {
        assert!(is_stale(None, RefreshInterval::from_hours(24.0), t0()));
        assert!(is_stale(None, RefreshInterval::from_hours(0.0), t0()));
    }

    #[test]
    fn test_zero_interval_is_always_stale() {
        let interval = RefreshInterval::from_hours(0.0);
        for offset_secs in [-3_600, 0, 1, 86_400] {
            let now = t0() + Duration::seconds(offset_secs);
            assert!(is_stale(Some(t0()), interval, now), "offset {offset_secs}s");
        }
    }

    #[test]
    fn test_stale_iff_interval_has_elapsed() {
        for hours in [0.25, 1.0, 1.5, 24.0, 168.0] {
            let interval = RefreshInterval::from_hours(hours);
            let boundary = t0() + interval.as_duration();

            assert!(!is_stale(Some(t0()), interval, t0()), "h={hours} at t0");
            assert!(
                !is_stale(Some(t0()), interval, boundary - Duration::milliseconds(1)),
                "h={hours} just before boundary"
            );
            assert!(is_stale(Some(t0()), interval, boundary), "h={hours} at boundary");
            assert!(
                is_stale(Some(t0()), interval, boundary + Duration::hours(3)),
                "h={hours} after boundary"
            );
        }
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let interval = RefreshInterval::from_hours(1.0);
        let now = t0() - Duration::minutes(5);
        assert!(!is_stale(Some(t0()), interval, now));
    }

    #[test]
    fn test_fractional_hours_are_respected() {
        let interval = RefreshInterval::from_hours(0.5);
        assert_eq!(interval.as_duration(), Duration::minutes(30));
    }

    #[test]
    fn test_invalid_hours_collapse_to_zero() {
        assert!(RefreshInterval::from_hours(-2.0).is_zero());
        assert!(RefreshInterval::from_hours(f64::NAN).is_zero());
        assert!(RefreshInterval::from_hours(f64::INFINITY).is_zero());
    }
}

//! Business-day arithmetic shared by staleness and expiry checks.

use chrono::{DateTime, Utc};

/// Number of days from `from` to `to`, rounded up; 0 when `to <= from`.
///
/// A prescription written exactly ten days ago ages to 10, and a lot
/// expiring in any fraction of a day still reports 1 day left.
pub fn days_ceil(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let secs = (to - from).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs as u64).div_ceil(86_400) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn exact_days_round_to_themselves() {
        let now = Utc::now();
        assert_eq!(days_ceil(now - Duration::days(10), now), 10);
    }

    #[test]
    fn partial_days_round_up() {
        let now = Utc::now();
        assert_eq!(days_ceil(now - Duration::hours(25), now), 2);
        assert_eq!(days_ceil(now, now + Duration::hours(1)), 1);
    }

    #[test]
    fn past_or_equal_is_zero() {
        let now = Utc::now();
        assert_eq!(days_ceil(now, now), 0);
        assert_eq!(days_ceil(now, now - Duration::days(3)), 0);
    }
}

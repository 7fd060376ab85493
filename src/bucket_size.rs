// =============================================================================
// Bucket Size — deriving V from historical daily volume
// =============================================================================
//
//   V = floor( (sum of daily volumes / number of trading days) / divisor )
//
// With the usual divisor of 50 an average day fills about fifty buckets. An
// instrument with no history, or so little volume that V rounds to zero, has
// no usable bucket size; callers treat that as "nothing to compute".

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

pub const DEFAULT_BUCKET_DIVISOR: u64 = 50;

/// Total traded volume per calendar date.
#[derive(Debug, Clone, Default)]
pub struct DailyVolumes {
    by_date: BTreeMap<NaiveDate, u64>,
}

impl DailyVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: NaiveDateTime, volume: u64) {
        *self.by_date.entry(at.date()).or_insert(0) += volume;
    }

    /// Number of dates that saw any volume.
    pub fn days(&self) -> usize {
        self.by_date.len()
    }

    pub fn total(&self) -> u64 {
        self.by_date.values().sum()
    }

    /// Restrict to dates in `[start, end]` (inclusive).
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        if start > end {
            return Self::default();
        }
        Self {
            by_date: self
                .by_date
                .range(start..=end)
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    /// Bucket size for this history, or `None` if there is none to speak of.
    pub fn bucket_size(&self, divisor: u64) -> Option<u64> {
        bucket_size_from_daily(self.by_date.values().copied(), divisor)
    }
}

/// V from a sequence of daily volume totals.
pub fn bucket_size_from_daily<I>(daily: I, divisor: u64) -> Option<u64>
where
    I: IntoIterator<Item = u64>,
{
    if divisor == 0 {
        return None;
    }
    let (days, total) = daily
        .into_iter()
        .fold((0u64, 0u128), |(n, sum), v| (n + 1, sum + v as u128));
    if days == 0 {
        return None;
    }
    let v = total / days as u128 / divisor as u128;
    u64::try_from(v).ok().filter(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 2, d)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap()
    }

    #[test]
    fn fiftieth_of_average_day() {
        assert_eq!(bucket_size_from_daily([10_000, 20_000], 50), Some(300));
        // Truncates toward zero.
        assert_eq!(bucket_size_from_daily([5_049], 50), Some(100));
    }

    #[test]
    fn degenerate_history_has_no_bucket_size() {
        assert_eq!(bucket_size_from_daily(Vec::<u64>::new(), 50), None);
        assert_eq!(bucket_size_from_daily([49], 50), None);
        assert_eq!(bucket_size_from_daily([1_000], 0), None);
    }

    #[test]
    fn daily_volumes_group_by_date() {
        let mut d = DailyVolumes::new();
        d.record(day(3), 400);
        d.record(day(3), 600);
        d.record(day(4), 2_000);
        assert_eq!(d.days(), 2);
        assert_eq!(d.total(), 3_000);
        assert_eq!(d.bucket_size(10), Some(150));
    }

    #[test]
    fn between_is_inclusive() {
        let mut d = DailyVolumes::new();
        for n in 1..=10 {
            d.record(day(n), 100 * n as u64);
        }
        let sub = d.between(day(3).date(), day(5).date());
        assert_eq!(sub.days(), 3);
        assert_eq!(sub.total(), 1_200);
    }
}

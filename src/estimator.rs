// =============================================================================
// Rolling VPIN Estimator — order-flow imbalance over the last N buckets
// =============================================================================
//
//   imbalance = sum_i |buy_i - sell_i|   over the N buckets in the window
//   vpin      = imbalance / (N * V)
//
// Each |buy - sell| is at most V, so vpin lies in [0, 1] whenever the buckets
// are well formed. A value outside that range is reported as a fatal error,
// never clamped.
//
// The window is a fixed-capacity FIFO; the imbalance sum is maintained
// incrementally as buckets enter and leave.

use std::collections::VecDeque;

use tracing::{debug, error};

use crate::error::{VpinError, VpinResult};
use crate::types::{Bucket, Phase, VpinSample};

#[derive(Debug)]
pub struct VpinEstimator {
    bucket_size: u64,
    window_len: usize,
    /// N * V, the largest possible window imbalance.
    capacity: u64,
    window: VecDeque<Bucket>,
    imbalance: u64,
    samples_emitted: u64,
}

impl VpinEstimator {
    pub fn new(bucket_size: u64, window_len: usize) -> VpinResult<Self> {
        if bucket_size == 0 {
            return Err(VpinError::InvalidConfig(
                "bucket size must be positive".to_string(),
            ));
        }
        if window_len == 0 {
            return Err(VpinError::InvalidConfig(
                "window length must be positive".to_string(),
            ));
        }
        let capacity = (window_len as u64).checked_mul(bucket_size).ok_or_else(|| {
            VpinError::InvalidConfig(format!(
                "window {window_len} x bucket size {bucket_size} overflows"
            ))
        })?;

        Ok(Self {
            bucket_size,
            window_len,
            capacity,
            window: VecDeque::with_capacity(window_len + 1),
            imbalance: 0,
            samples_emitted: 0,
        })
    }

    /// Push a completed bucket into the window.
    ///
    /// Returns `Ok(None)` while warming up, `Ok(Some(sample))` once the window
    /// holds N buckets, and `Err` if the bucket or the result breaks the
    /// volume invariants.
    pub fn observe(&mut self, bucket: Bucket) -> VpinResult<Option<VpinSample>> {
        if bucket.total() != self.bucket_size {
            error!(
                buy = bucket.buy_volume,
                sell = bucket.sell_volume,
                expected = self.bucket_size,
                "malformed bucket reached the estimator"
            );
            return Err(VpinError::MalformedBucket {
                buy: bucket.buy_volume,
                sell: bucket.sell_volume,
                expected: self.bucket_size,
            });
        }

        self.imbalance += bucket.imbalance();
        self.window.push_back(bucket);
        if self.window.len() > self.window_len {
            if let Some(evicted) = self.window.pop_front() {
                self.imbalance -= evicted.imbalance();
            }
        }

        if self.window.len() < self.window_len {
            return Ok(None);
        }

        let vpin = self.imbalance as f64 / self.capacity as f64;
        if !(0.0..=1.0).contains(&vpin) {
            error!(
                vpin,
                imbalance = self.imbalance,
                capacity = self.capacity,
                "vpin outside [0, 1]; bucket construction is broken"
            );
            return Err(VpinError::VpinOutOfRange {
                value: vpin,
                imbalance: self.imbalance,
                capacity: self.capacity,
            });
        }

        self.samples_emitted += 1;
        debug!(vpin = format!("{:.4}", vpin), at = %bucket.timestamp, "vpin sample");

        Ok(Some(VpinSample {
            timestamp: bucket.timestamp,
            vpin,
        }))
    }

    pub fn phase(&self) -> Phase {
        if self.window.len() < self.window_len {
            Phase::Warmup
        } else {
            Phase::Steady
        }
    }

    /// Number of buckets currently held (at most N).
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn samples_emitted(&self) -> u64 {
        self.samples_emitted
    }

    /// Drop every bucket and start warming up again.
    pub fn reset(&mut self) {
        self.window.clear();
        self.imbalance = 0;
        self.samples_emitted = 0;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 5, 4)
            .unwrap()
            .and_hms_opt(14, 0, sec)
            .unwrap()
    }

    fn bucket(sec: u32, buy: u64, sell: u64) -> Bucket {
        Bucket {
            timestamp: at(sec),
            buy_volume: buy,
            sell_volume: sell,
        }
    }

    #[test]
    fn fully_one_sided_window_is_one() {
        let mut e = VpinEstimator::new(5, 2).unwrap();
        assert!(e.observe(bucket(1, 5, 0)).unwrap().is_none());
        let s = e.observe(bucket(2, 0, 5)).unwrap().unwrap();
        assert!((s.vpin - 1.0).abs() < 1e-12);
        assert_eq!(s.timestamp, at(2));
    }

    #[test]
    fn near_balanced_window() {
        let mut e = VpinEstimator::new(5, 2).unwrap();
        e.observe(bucket(1, 3, 2)).unwrap();
        let s = e.observe(bucket(2, 2, 3)).unwrap().unwrap();
        assert!((s.vpin - 0.2).abs() < 1e-12);
    }

    #[test]
    fn first_sample_after_nth_bucket() {
        let mut e = VpinEstimator::new(10, 3).unwrap();
        assert!(e.observe(bucket(1, 10, 0)).unwrap().is_none());
        assert!(e.observe(bucket(2, 10, 0)).unwrap().is_none());
        assert_eq!(e.phase(), Phase::Warmup);
        assert!(e.observe(bucket(3, 10, 0)).unwrap().is_some());
        assert_eq!(e.phase(), Phase::Steady);
    }

    #[test]
    fn window_slides_and_evicts_oldest() {
        let mut e = VpinEstimator::new(10, 2).unwrap();
        e.observe(bucket(1, 10, 0)).unwrap();
        e.observe(bucket(2, 5, 5)).unwrap();
        // Window is now [(5,5), (6,4)] => (0 + 2) / 20.
        let s = e.observe(bucket(3, 6, 4)).unwrap().unwrap();
        assert!((s.vpin - 0.1).abs() < 1e-12);
        assert_eq!(e.len(), 2);
        assert_eq!(e.samples_emitted(), 2);
    }

    #[test]
    fn malformed_bucket_is_fatal() {
        let mut e = VpinEstimator::new(10, 2).unwrap();
        let err = e.observe(bucket(1, 8, 8)).unwrap_err();
        assert!(err.is_fatal());
        assert!(e.is_empty());
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(matches!(VpinEstimator::new(10, 0), Err(VpinError::InvalidConfig(_))));
        assert!(matches!(VpinEstimator::new(0, 5), Err(VpinError::InvalidConfig(_))));
    }

    #[test]
    fn reset_returns_to_warmup() {
        let mut e = VpinEstimator::new(4, 1).unwrap();
        assert!(e.observe(bucket(1, 4, 0)).unwrap().is_some());
        e.reset();
        assert_eq!(e.phase(), Phase::Warmup);
        assert!(e.is_empty());
    }
}

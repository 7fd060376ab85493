// =============================================================================
// Volume Bucketizer — re-samples a tick stream onto a volume clock
// =============================================================================
//
// Ticks arrive with irregular sizes and timing. The bucketizer accumulates
// them until exactly V units of volume have traded, then cuts a bucket:
//
//   remaining = V - volume_in_progress
//   tick.volume <  remaining  => add to the in-progress buy/sell counter
//   tick.volume >= remaining  => `remaining` units of the tick complete the
//                                bucket; the excess seeds the next bucket
//                                with the same side
//
// A tick larger than a whole bucket keeps filling and cutting buckets until
// its volume is spent, so one tick yields zero, one, or several buckets. Every
// bucket cut from the same tick carries that tick's side and timestamp.
//
// Whatever is left in the accumulator when the stream ends is never emitted.

use tracing::debug;

use crate::error::{VpinError, VpinResult};
use crate::types::{Bucket, Side, Tick};

// =============================================================================
// Accumulator
// =============================================================================

/// Running totals of the bucket currently being filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulator {
    pub total_volume: u64,
    pub buy_volume: u64,
    pub sell_volume: u64,
}

impl Accumulator {
    fn add(&mut self, side: Side, volume: u64) {
        match side {
            Side::Buy => self.buy_volume += volume,
            Side::Sell => self.sell_volume += volume,
        }
        self.total_volume += volume;
    }

    /// Close out the accumulated volume as a bucket and start empty.
    fn take(&mut self, timestamp: chrono::NaiveDateTime) -> Bucket {
        let bucket = Bucket {
            timestamp,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
        };
        *self = Self::default();
        bucket
    }
}

// =============================================================================
// Bucketizer
// =============================================================================

/// Cuts a tick stream into buckets of exactly `bucket_size` volume.
#[derive(Debug, Clone)]
pub struct Bucketizer {
    bucket_size: u64,
    acc: Accumulator,
    ticks_ingested: u64,
    volume_ingested: u64,
    buckets_completed: u64,
    /// Buckets beyond the first produced by a single oversized tick.
    split_buckets: u64,
}

impl Bucketizer {
    pub fn new(bucket_size: u64) -> VpinResult<Self> {
        if bucket_size == 0 {
            return Err(VpinError::InvalidConfig(
                "bucket size must be positive".to_string(),
            ));
        }
        Ok(Self {
            bucket_size,
            acc: Accumulator::default(),
            ticks_ingested: 0,
            volume_ingested: 0,
            buckets_completed: 0,
            split_buckets: 0,
        })
    }

    /// Clear all in-progress volume and counters. Call at stream start when
    /// reusing a bucketizer for another instrument or period.
    pub fn reset(&mut self) {
        self.acc = Accumulator::default();
        self.ticks_ingested = 0;
        self.volume_ingested = 0;
        self.buckets_completed = 0;
        self.split_buckets = 0;
    }

    /// Feed one tick; returns the buckets it completed (usually none or one).
    pub fn ingest(&mut self, tick: &Tick) -> VpinResult<Vec<Bucket>> {
        if tick.volume == 0 {
            return Err(VpinError::InvalidTick { volume: tick.volume });
        }

        self.ticks_ingested += 1;
        self.volume_ingested += tick.volume;

        let mut completed = Vec::new();
        let mut left = tick.volume;

        while left > 0 {
            let remaining = self.bucket_size - self.acc.total_volume;
            if left < remaining {
                self.acc.add(tick.side, left);
                break;
            }

            self.acc.add(tick.side, remaining);
            left -= remaining;
            let bucket = self.acc.take(tick.timestamp);
            debug!(
                buy = bucket.buy_volume,
                sell = bucket.sell_volume,
                at = %bucket.timestamp,
                carry = left,
                "volume bucket completed"
            );
            completed.push(bucket);
        }

        if completed.len() > 1 {
            self.split_buckets += completed.len() as u64 - 1;
        }
        self.buckets_completed += completed.len() as u64;

        Ok(completed)
    }

    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// The bucket currently being filled.
    pub fn in_progress(&self) -> Accumulator {
        self.acc
    }

    pub fn ticks_ingested(&self) -> u64 {
        self.ticks_ingested
    }

    pub fn volume_ingested(&self) -> u64 {
        self.volume_ingested
    }

    pub fn buckets_completed(&self) -> u64 {
        self.buckets_completed
    }

    pub fn split_buckets(&self) -> u64 {
        self.split_buckets
    }
}

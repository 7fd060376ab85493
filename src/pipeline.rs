// =============================================================================
// Per-instrument VPIN pipeline — bucketizer feeding the rolling estimator
// =============================================================================
//
// One pipeline owns one instrument's accumulator and window. Nothing is
// shared, so independent instruments can run on independent workers.
//
//   WARMUP  (window < N)   buckets accumulate, no samples
//   STEADY  (window == N)  one sample per completed bucket
//
// There is no terminal state. When the stream ends, `finish` reports the
// volume stranded in the unfinished bucket; that bucket is dropped.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::bucketizer::Bucketizer;
use crate::error::{VpinError, VpinResult};
use crate::estimator::VpinEstimator;
use crate::types::{Bucket, Phase, Tick, VpinSample};

/// Counters describing a finished (or abandoned) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub bucket_size: u64,
    pub window_len: usize,
    pub ticks_ingested: u64,
    pub volume_ingested: u64,
    pub buckets_completed: u64,
    pub split_buckets: u64,
    pub samples_emitted: u64,
    /// Volume in the trailing partial bucket, never emitted.
    pub volume_discarded: u64,
    pub final_phase: Phase,
}

#[derive(Debug)]
pub struct VpinPipeline {
    bucketizer: Bucketizer,
    estimator: VpinEstimator,
    last_timestamp: Option<NaiveDateTime>,
}

impl VpinPipeline {
    pub fn new(bucket_size: u64, window_len: usize) -> VpinResult<Self> {
        Ok(Self {
            bucketizer: Bucketizer::new(bucket_size)?,
            estimator: VpinEstimator::new(bucket_size, window_len)?,
            last_timestamp: None,
        })
    }

    /// Feed one tick and collect any samples it produced.
    ///
    /// If a later bucket from the same tick fails, the samples already
    /// produced for earlier buckets are logged and dropped; use `push_into`
    /// to keep them.
    pub fn push(&mut self, tick: &Tick) -> VpinResult<Vec<VpinSample>> {
        let mut samples = Vec::new();
        match self.push_into(tick, &mut samples) {
            Ok(()) => Ok(samples),
            Err(e) => {
                if !samples.is_empty() {
                    error!(
                        dropped = samples.len(),
                        last = %samples[samples.len() - 1].timestamp,
                        error = %e,
                        "samples produced before failure were dropped"
                    );
                }
                Err(e)
            }
        }
    }

    /// Feed one tick, appending its samples to `out`. On error, `out` still
    /// holds every sample produced before the failing bucket, matching the
    /// window state.
    pub fn push_into(&mut self, tick: &Tick, out: &mut Vec<VpinSample>) -> VpinResult<()> {
        if let Some(previous) = self.last_timestamp {
            if tick.timestamp < previous {
                return Err(VpinError::OutOfOrder {
                    previous,
                    timestamp: tick.timestamp,
                });
            }
        }

        let buckets = self.bucketizer.ingest(tick)?;
        self.last_timestamp = Some(tick.timestamp);
        self.observe_buckets(buckets, out)
    }

    fn observe_buckets(&mut self, buckets: Vec<Bucket>, out: &mut Vec<VpinSample>) -> VpinResult<()> {
        for bucket in buckets {
            let was_warming = self.estimator.phase() == Phase::Warmup;
            if let Some(sample) = self.estimator.observe(bucket)? {
                if was_warming {
                    info!(
                        at = %sample.timestamp,
                        window = self.estimator.window_len(),
                        "window full, pipeline steady"
                    );
                }
                out.push(sample);
            }
        }
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.estimator.phase()
    }

    pub fn bucket_size(&self) -> u64 {
        self.bucketizer.bucket_size()
    }

    /// Start over as if no tick had been seen.
    pub fn reset(&mut self) {
        self.bucketizer.reset();
        self.estimator.reset();
        self.last_timestamp = None;
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            bucket_size: self.bucketizer.bucket_size(),
            window_len: self.estimator.window_len(),
            ticks_ingested: self.bucketizer.ticks_ingested(),
            volume_ingested: self.bucketizer.volume_ingested(),
            buckets_completed: self.bucketizer.buckets_completed(),
            split_buckets: self.bucketizer.split_buckets(),
            samples_emitted: self.estimator.samples_emitted(),
            volume_discarded: self.bucketizer.in_progress().total_volume,
            final_phase: self.estimator.phase(),
        }
    }

    /// End of stream: the partial bucket is dropped.
    pub fn finish(self) -> PipelineSummary {
        let summary = self.summary();
        debug!(
            discarded = summary.volume_discarded,
            buckets = summary.buckets_completed,
            "stream ended, partial bucket discarded"
        );
        summary
    }
}

// =============================================================================
// Streaming adapter
// =============================================================================

/// Lazily turns a tick iterator into a sample iterator. On error, samples
/// produced before the failure are yielded first, then the error, then the
/// stream ends.
pub struct VpinStream<I> {
    ticks: I,
    pipeline: VpinPipeline,
    pending: VecDeque<VpinSample>,
    error: Option<VpinError>,
    failed: bool,
}

impl<I: Iterator<Item = Tick>> VpinStream<I> {
    pub fn new(ticks: I, pipeline: VpinPipeline) -> Self {
        Self {
            ticks,
            pipeline,
            pending: VecDeque::new(),
            error: None,
            failed: false,
        }
    }

    pub fn pipeline(&self) -> &VpinPipeline {
        &self.pipeline
    }

    pub fn into_pipeline(self) -> VpinPipeline {
        self.pipeline
    }
}

impl<I: Iterator<Item = Tick>> Iterator for VpinStream<I> {
    type Item = VpinResult<VpinSample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Some(Ok(sample));
            }
            if let Some(e) = self.error.take() {
                return Some(Err(e));
            }
            if self.failed {
                return None;
            }
            let tick = self.ticks.next()?;
            let mut samples = Vec::new();
            let result = self.pipeline.push_into(&tick, &mut samples);
            self.pending.extend(samples);
            if let Err(e) = result {
                self.failed = true;
                self.error = Some(e);
            }
        }
    }
}

/// Run a whole tick sequence through a fresh pipeline.
///
/// A zero bucket size means the instrument has no usable volume history and
/// yields an empty series rather than an error.
pub fn compute_vpin<I>(ticks: I, bucket_size: u64, window_len: usize) -> VpinResult<Vec<VpinSample>>
where
    I: IntoIterator<Item = Tick>,
{
    if bucket_size == 0 {
        return Ok(Vec::new());
    }
    let pipeline = VpinPipeline::new(bucket_size, window_len)?;
    VpinStream::new(ticks.into_iter(), pipeline).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::NaiveDate;

    fn at(min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 7, 1)
            .unwrap()
            .and_hms_opt(10, min, 0)
            .unwrap()
    }

    fn tick(min: u32, volume: u64, side: Side) -> Tick {
        Tick::new(at(min), volume, side)
    }

    /// Pseudo-random but fixed stream of mixed-size ticks.
    fn mixed_ticks(n: u32) -> Vec<Tick> {
        let mut seed: u64 = 0x2545_f491;
        (0..n)
            .map(|i| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let volume = seed % 37 + 1;
                let side = if seed % 5 < 3 { Side::Buy } else { Side::Sell };
                Tick::new(at(0) + chrono::Duration::seconds(i as i64), volume, side)
            })
            .collect()
    }

    #[test]
    fn fewer_than_n_buckets_yield_nothing() {
        // V = 10, N = 3, only 25 units => two buckets.
        let ticks = vec![tick(1, 10, Side::Buy), tick(2, 10, Side::Sell), tick(3, 5, Side::Buy)];
        assert!(compute_vpin(ticks, 10, 3).unwrap().is_empty());
    }

    #[test]
    fn first_sample_arrives_with_third_bucket() {
        let mut p = VpinPipeline::new(10, 3).unwrap();
        assert!(p.push(&tick(1, 10, Side::Buy)).unwrap().is_empty());
        assert!(p.push(&tick(2, 10, Side::Buy)).unwrap().is_empty());
        assert_eq!(p.phase(), Phase::Warmup);
        let out = p.push(&tick(3, 10, Side::Sell)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(3));
        assert!((out[0].vpin - 1.0).abs() < 1e-12);
        assert_eq!(p.phase(), Phase::Steady);
    }

    #[test]
    fn oversized_tick_can_emit_several_samples() {
        let mut p = VpinPipeline::new(5, 1).unwrap();
        let out = p.push(&tick(1, 17, Side::Sell)).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|s| (s.vpin - 1.0).abs() < 1e-12));
        assert_eq!(p.summary().volume_discarded, 2);
    }

    #[test]
    fn samples_stay_in_unit_interval() {
        let samples = compute_vpin(mixed_ticks(2_000), 40, 25).unwrap();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| (0.0..=1.0).contains(&s.vpin)));
    }

    #[test]
    fn replay_is_deterministic() {
        let a = compute_vpin(mixed_ticks(1_500), 30, 10).unwrap();
        let b = compute_vpin(mixed_ticks(1_500), 30, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn summary_conserves_volume() {
        let ticks = mixed_ticks(800);
        let input: u64 = ticks.iter().map(|t| t.volume).sum();
        let mut p = VpinPipeline::new(25, 4).unwrap();
        let mut samples = 0u64;
        for t in &ticks {
            samples += p.push(t).unwrap().len() as u64;
        }
        let s = p.finish();
        assert_eq!(s.buckets_completed * 25 + s.volume_discarded, input);
        assert_eq!(s.samples_emitted, samples);
        assert_eq!(s.samples_emitted, s.buckets_completed - 3);
        assert_eq!(s.final_phase, Phase::Steady);
    }

    #[test]
    fn empty_input_and_zero_bucket_size_give_empty_output() {
        assert!(compute_vpin(Vec::new(), 10, 3).unwrap().is_empty());
        assert!(compute_vpin(mixed_ticks(50), 0, 3).unwrap().is_empty());
    }

    #[test]
    fn out_of_order_tick_fails_fast() {
        let mut p = VpinPipeline::new(10, 2).unwrap();
        p.push(&tick(5, 3, Side::Buy)).unwrap();
        let err = p.push(&tick(4, 3, Side::Buy)).unwrap_err();
        assert!(matches!(err, VpinError::OutOfOrder { .. }));
        // Equal timestamps are fine.
        assert!(p.push(&tick(5, 3, Side::Sell)).is_ok());
    }

    #[test]
    fn samples_before_a_failing_bucket_are_kept() {
        let mut p = VpinPipeline::new(5, 1).unwrap();
        let good = Bucket { timestamp: at(1), buy_volume: 5, sell_volume: 0 };
        let bad = Bucket { timestamp: at(1), buy_volume: 3, sell_volume: 3 };

        let mut out = Vec::new();
        let err = p.observe_buckets(vec![good, bad], &mut out).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(out.len(), 1);
        assert!((out[0].vpin - 1.0).abs() < 1e-12);
        assert_eq!(p.summary().samples_emitted, 1);
    }

    #[test]
    fn pipeline_state_is_debuggable() {
        let mut p = VpinPipeline::new(5, 2).unwrap();
        p.push(&tick(1, 7, Side::Buy)).unwrap();
        let dump = format!("{p:?}");
        assert!(dump.contains("VpinPipeline"));
        assert!(dump.contains("VpinEstimator"));
        assert!(dump.contains("window_len: 2"));
    }

    #[test]
    fn push_into_appends_across_ticks() {
        let mut p = VpinPipeline::new(5, 1).unwrap();
        let mut out = Vec::new();
        p.push_into(&tick(1, 12, Side::Buy), &mut out).unwrap();
        p.push_into(&tick(2, 3, Side::Sell), &mut out).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].timestamp, at(2));
        // Last bucket: 2 buy carried + 3 sell.
        assert!((out[2].vpin - 0.2).abs() < 1e-12);
    }

    #[test]
    fn stream_stops_after_error() {
        let ticks = vec![tick(1, 5, Side::Buy), tick(2, 0, Side::Buy), tick(3, 5, Side::Buy)];
        let mut stream = VpinStream::new(ticks.into_iter(), VpinPipeline::new(5, 1).unwrap());
        assert!(stream.next().unwrap().is_ok());
        assert!(matches!(stream.next(), Some(Err(VpinError::InvalidTick { .. }))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn reset_isolates_runs() {
        let mut p = VpinPipeline::new(10, 1).unwrap();
        p.push(&tick(1, 7, Side::Buy)).unwrap();
        p.reset();
        let out = p.push(&tick(0, 10, Side::Sell)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(p.summary().ticks_ingested, 1);
    }
}

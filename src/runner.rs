// =============================================================================
// Instrument Runner — one instrument's raw ticks to a VPIN series
// =============================================================================
//
// Two passes over the tick source:
//   1. Daily volume totals, from which the bucket size V is derived.
//   2. Classification, period scoping and the VPIN pipeline proper.
//
// Bucket size policy:
//   Global     one V from the full history, one pipeline across all periods
//   PerPeriod  V from each period's own days, a fresh pipeline per period
//
// An instrument (or period) with no usable volume history produces no
// samples and is not an error.
//
// The cancel flag is checked before every tick in both passes; a cancelled
// run stops where it is and reports `Outcome::Cancelled`.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::bucket_size::DailyVolumes;
use crate::error::VpinError;
use crate::periods::{locate, BucketSizePolicy};
use crate::pipeline::{PipelineSummary, VpinPipeline};
use crate::runtime_config::RunConfig;
use crate::tick_flags::{FilterStats, RawTick, TickFilter};
use crate::types::{Tick, VpinSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Completed,
    NoVolumeHistory,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodReport {
    pub label: String,
    pub bucket_size: Option<u64>,
    pub ticks: u64,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub instrument: String,
    pub outcome: Outcome,
    pub filter: FilterStats,
    pub periods: Vec<PeriodReport>,
    /// One summary per pipeline run (one for Global, one per period otherwise).
    pub pipelines: Vec<PipelineSummary>,
    pub samples: u64,
}

impl InstrumentReport {
    fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            outcome: Outcome::Completed,
            filter: FilterStats::default(),
            periods: Vec::new(),
            pipelines: Vec::new(),
            samples: 0,
        }
    }
}

/// Compute the VPIN series for one instrument.
///
/// `open` must yield the same chronologically ordered raw ticks each time it
/// is called; `sink` receives every sample in order. Setting `cancel` stops
/// the run before the next tick.
pub fn run_instrument<S, I, W>(
    instrument: &str,
    cfg: &RunConfig,
    cancel: &AtomicBool,
    open: S,
    mut sink: W,
) -> Result<InstrumentReport>
where
    S: Fn() -> Result<I>,
    I: Iterator<Item = Result<RawTick>>,
    W: FnMut(&VpinSample) -> Result<()>,
{
    let mut report = InstrumentReport::new(instrument);

    // ── Pass 1: daily volumes ───────────────────────────────────────────
    let mut daily = DailyVolumes::new();
    for raw in open()? {
        if cancel.load(Ordering::Relaxed) {
            return Ok(cancelled(report));
        }
        let raw = raw?;
        if raw.volume > 0 {
            daily.record(raw.ticktime, raw.volume as u64);
        }
    }

    let global_v = daily.bucket_size(cfg.bucket_divisor);
    report.periods = cfg
        .periods
        .iter()
        .map(|p| PeriodReport {
            label: p.label.clone(),
            bucket_size: match cfg.bucket_size_policy {
                BucketSizePolicy::Global => global_v,
                BucketSizePolicy::PerPeriod => {
                    daily.between(p.start, p.end).bucket_size(cfg.bucket_divisor)
                }
            },
            ..PeriodReport::default()
        })
        .collect();

    let no_history = match cfg.bucket_size_policy {
        BucketSizePolicy::Global => global_v.is_none(),
        BucketSizePolicy::PerPeriod => report.periods.iter().all(|p| p.bucket_size.is_none()),
    };
    if no_history {
        info!(instrument, days = daily.days(), "no usable volume history, skipping");
        report.outcome = Outcome::NoVolumeHistory;
        return Ok(report);
    }

    info!(
        instrument,
        days = daily.days(),
        bucket_size = ?global_v,
        policy = %cfg.bucket_size_policy,
        "bucket size derived"
    );

    // ── Pass 2: classify, scope, bucketize, estimate ────────────────────
    let mut filter = TickFilter::new();
    let mut current: Option<usize> = None;
    let mut pipeline: Option<VpinPipeline> = match (cfg.bucket_size_policy, global_v) {
        (BucketSizePolicy::Global, Some(v)) => Some(VpinPipeline::new(v, cfg.window_len)?),
        _ => None,
    };

    for raw in open()? {
        if cancel.load(Ordering::Relaxed) {
            report.filter = filter.stats();
            if let Some(done) = pipeline.take() {
                report.pipelines.push(done.finish());
            }
            return Ok(cancelled(report));
        }
        let raw = raw?;
        let Some(tick) = filter.classify(&raw) else {
            continue;
        };
        let Some(idx) = locate(&cfg.periods, tick.timestamp) else {
            continue;
        };

        if current != Some(idx) {
            if current.is_some_and(|c| idx < c) {
                bail!("{instrument}: tick at {} is out of chronological order", tick.timestamp);
            }
            info!(instrument, period = %cfg.periods[idx].label, "entering period");
            if cfg.bucket_size_policy == BucketSizePolicy::PerPeriod {
                if let Some(done) = pipeline.take() {
                    report.pipelines.push(done.finish());
                }
                pipeline = match report.periods[idx].bucket_size {
                    Some(v) => Some(VpinPipeline::new(v, cfg.window_len)?),
                    None => {
                        warn!(
                            instrument,
                            period = %cfg.periods[idx].label,
                            "no usable volume in period, skipping"
                        );
                        None
                    }
                };
            }
            current = Some(idx);
        }

        let Some(p) = pipeline.as_mut() else {
            continue;
        };
        let samples = push_tick(instrument, p, &tick)?;
        let period = &mut report.periods[idx];
        period.ticks += 1;
        period.samples += samples.len() as u64;
        for sample in &samples {
            sink(sample)?;
        }
        report.samples += samples.len() as u64;
    }

    if let Some(done) = pipeline.take() {
        report.pipelines.push(done.finish());
    }
    report.filter = filter.stats();

    info!(
        instrument,
        samples = report.samples,
        accepted = report.filter.accepted,
        dropped = report.filter.dropped(),
        "instrument complete"
    );

    Ok(report)
}

fn cancelled(mut report: InstrumentReport) -> InstrumentReport {
    warn!(instrument = %report.instrument, samples = report.samples, "run cancelled");
    report.outcome = Outcome::Cancelled;
    report
}

fn push_tick(
    instrument: &str,
    pipeline: &mut VpinPipeline,
    tick: &Tick,
) -> Result<Vec<VpinSample>> {
    pipeline
        .push(tick)
        .map_err(|e: VpinError| {
            if e.is_fatal() {
                error!(instrument, error = %e, "internal consistency violation");
            }
            e
        })
        .with_context(|| format!("{instrument}: pipeline failed at {}", tick.timestamp))
}

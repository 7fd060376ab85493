// =============================================================================
// vpin-flow — Batch Entry Point
// =============================================================================
//
// Computes one VPIN series per instrument found in the tick directory. Each
// instrument owns its own pipeline, so instruments run on independent
// blocking workers with nothing shared but the final report.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vpin_flow::runner::{run_instrument, InstrumentReport, Outcome};
use vpin_flow::runtime_config::RunConfig;
use vpin_flow::tick_source::{list_instruments, sample_path, tick_path, RawTickReader, SampleWriter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("VPIN_CONFIG").unwrap_or_else(|_| "run_config.json".into());
    let mut config = RunConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RunConfig::default()
    });

    if let Ok(list) = std::env::var("VPIN_INSTRUMENTS") {
        config.instruments = list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // ── 2. Work list ─────────────────────────────────────────────────────
    let mut instruments = list_instruments(&config.input_dir)?;
    if !config.instruments.is_empty() {
        instruments.retain(|i| config.instruments.contains(i));
    }

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("failed to create output dir {}", config.output_dir.display())
    })?;

    if config.skip_completed {
        let before = instruments.len();
        instruments.retain(|i| !sample_path(&config.output_dir, i).exists());
        info!(skipped = before - instruments.len(), "already computed instruments skipped");
    }

    info!(
        count = instruments.len(),
        window_len = config.window_len,
        policy = %config.bucket_size_policy,
        "starting VPIN run"
    );

    // ── 3. One blocking worker per instrument ────────────────────────────
    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    let permits = Arc::new(Semaphore::new(workers));
    let config = Arc::new(config);
    let reports: Arc<Mutex<Vec<InstrumentReport>>> = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(Mutex::new(Vec::<String>::new()));
    let cancel = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(instruments.len());
    for instrument in instruments {
        let permits = permits.clone();
        let config = config.clone();
        let reports = reports.clone();
        let failures = failures.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let name = instrument.clone();
            let result = tokio::task::spawn_blocking(move || {
                process_instrument(&instrument, &config, &cancel)
            })
            .await;
            match result {
                Ok(Ok(report)) => reports.lock().push(report),
                Ok(Err(e)) => {
                    error!(instrument = %name, error = %format!("{e:#}"), "instrument failed");
                    failures.lock().push(name);
                }
                Err(e) => {
                    error!(instrument = %name, error = %e, "instrument worker panicked");
                    failures.lock().push(name);
                }
            }
        }));
    }

    // ── 4. Wait; on Ctrl+C cancel the rest and wait for workers to stop ──
    let all = futures_util::future::join_all(handles);
    tokio::pin!(all);
    tokio::select! {
        _ = &mut all => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received — cancelling unfinished instruments");
            cancel.store(true, Ordering::Relaxed);
            all.await;
        }
    }

    let mut reports = std::mem::take(&mut *reports.lock());
    reports.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    let failures = failures.lock().clone();

    let report_path: PathBuf = config.output_dir.join("run_report.json");
    let json = serde_json::to_string_pretty(&reports).context("failed to serialise run report")?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    let cancelled = reports
        .iter()
        .filter(|r| r.outcome == Outcome::Cancelled)
        .count();
    info!(
        completed = reports.len() - cancelled,
        cancelled,
        failed = failures.len(),
        samples = reports.iter().map(|r| r.samples).sum::<u64>(),
        report = %report_path.display(),
        "VPIN run complete"
    );

    if !failures.is_empty() {
        anyhow::bail!("{} instrument(s) failed: {}", failures.len(), failures.join(", "));
    }
    Ok(())
}

/// Read one instrument's ticks and write its series; the output file only
/// appears if the whole instrument succeeds and was not cancelled.
fn process_instrument(
    instrument: &str,
    config: &RunConfig,
    cancel: &AtomicBool,
) -> anyhow::Result<InstrumentReport> {
    let input = tick_path(&config.input_dir, instrument);
    let mut writer = SampleWriter::create(sample_path(&config.output_dir, instrument))?;

    let result = run_instrument(
        instrument,
        config,
        cancel,
        || RawTickReader::open(&input),
        |sample| writer.write(sample),
    );

    match result {
        Ok(report) if report.outcome == Outcome::Completed && report.samples > 0 => {
            writer.finish()?;
            Ok(report)
        }
        Ok(report) => {
            info!(instrument, outcome = ?report.outcome, "nothing written");
            writer.discard();
            Ok(report)
        }
        Err(e) => {
            writer.discard();
            Err(e)
        }
    }
}

// =============================================================================
// Run Configuration — VPIN batch settings with atomic save
// =============================================================================
//
// Every field carries a serde default so that an empty or partial JSON file
// still loads. Persistence uses the tmp + rename pattern so a crash never
// leaves a half-written config behind.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bucket_size::DEFAULT_BUCKET_DIVISOR;
use crate::periods::{default_quarters, BucketSizePolicy, Period};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_window_len() -> usize {
    250
}

fn default_bucket_divisor() -> u64 {
    DEFAULT_BUCKET_DIVISOR
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("ticks")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("vpins")
}

// =============================================================================
// RunConfig
// =============================================================================

/// Settings for one batch run over many instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of buckets in the rolling window (N).
    #[serde(default = "default_window_len")]
    pub window_len: usize,

    /// V = average daily volume / `bucket_divisor`.
    #[serde(default = "default_bucket_divisor")]
    pub bucket_divisor: u64,

    #[serde(default)]
    pub bucket_size_policy: BucketSizePolicy,

    /// Calendar ranges to compute over, in chronological order.
    #[serde(default = "default_quarters")]
    pub periods: Vec<Period>,

    /// Directory of `<INSTRUMENT>.jsonl` raw tick files.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory receiving `<INSTRUMENT>.csv` VPIN series.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Skip instruments whose output file already exists.
    #[serde(default = "default_true")]
    pub skip_completed: bool,

    /// Restrict the run to these instruments (empty = everything found).
    #[serde(default)]
    pub instruments: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_len: default_window_len(),
            bucket_divisor: default_bucket_divisor(),
            bucket_size_policy: BucketSizePolicy::default(),
            periods: default_quarters(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            skip_completed: true,
            instruments: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse run config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            window_len = config.window_len,
            policy = %config.bucket_size_policy,
            periods = config.periods.len(),
            "run config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise run config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "run config saved (atomic)");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_len == 0 {
            bail!("window_len must be positive");
        }
        if self.bucket_divisor == 0 {
            bail!("bucket_divisor must be positive");
        }
        if let Some(p) = self.periods.iter().find(|p| !p.is_valid()) {
            bail!("period {} ends before it starts", p.label);
        }
        if self
            .periods
            .windows(2)
            .any(|pair| pair[1].start <= pair[0].end)
        {
            bail!("periods must be chronological and non-overlapping");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.window_len, 250);
        assert_eq!(cfg.bucket_divisor, 50);
        assert_eq!(cfg.bucket_size_policy, BucketSizePolicy::Global);
        assert_eq!(cfg.periods.len(), 6);
        assert!(cfg.skip_completed);
        assert!(cfg.instruments.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.window_len, 250);
        assert_eq!(cfg.output_dir, PathBuf::from("vpins"));
        assert_eq!(cfg.periods[0].label, "2019Q4");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "window_len": 50,
            "bucket_size_policy": "PerPeriod",
            "periods": [{ "label": "jan", "start": "2020-01-01", "end": "2020-01-31" }]
        }"#;
        let cfg: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.window_len, 50);
        assert_eq!(cfg.bucket_size_policy, BucketSizePolicy::PerPeriod);
        assert_eq!(cfg.periods.len(), 1);
        assert_eq!(cfg.periods[0].end, NaiveDate::from_ymd_opt(2020, 1, 31).unwrap());
        assert_eq!(cfg.bucket_divisor, 50);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = RunConfig::default();
        cfg.window_len = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.periods.swap(0, 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_config.json");
        let mut cfg = RunConfig::default();
        cfg.window_len = 99;
        cfg.instruments = vec!["PETR4".into()];
        cfg.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.window_len, 99);
        assert_eq!(loaded.instruments, vec!["PETR4"]);
        assert!(!path.with_extension("json.tmp").exists());
    }
}

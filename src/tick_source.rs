// =============================================================================
// Tick Source & Sample Sink — file plumbing for the batch driver
// =============================================================================
//
// Input:  one `<INSTRUMENT>.jsonl` file per instrument, one raw tick per line
//         `{ "ticktime": "2020-01-02T10:00:01", "flags": 56, "volume": 300 }`
//         in chronological order.
// Output: one `<INSTRUMENT>.csv` per instrument, `timestamp,vpin` rows.
//
// Ticks are read line by line so a quarter of ticks never has to sit in
// memory. The CSV is written to a `.tmp` sibling and renamed on `finish`, so
// an abandoned instrument leaves no output and will be picked up again on
// the next run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::tick_flags::RawTick;
use crate::types::VpinSample;

const TICK_EXTENSION: &str = "jsonl";
const SAMPLE_EXTENSION: &str = "csv";

/// Instrument names look like `PETR4` or `BBDC11`: four upper-case letters
/// followed by one or two digits.
pub fn is_instrument_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    (5..=6).contains(&bytes.len())
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4..].iter().all(u8::is_ascii_digit)
}

/// Sorted instrument names with a tick file in `dir`.
pub fn list_instruments(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list tick directory {}", dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TICK_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if is_instrument_name(stem) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn tick_path(dir: &Path, instrument: &str) -> PathBuf {
    dir.join(format!("{instrument}.{TICK_EXTENSION}"))
}

pub fn sample_path(dir: &Path, instrument: &str) -> PathBuf {
    dir.join(format!("{instrument}.{SAMPLE_EXTENSION}"))
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Streaming iterator over the raw ticks in a JSON-lines file.
pub struct RawTickReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl RawTickReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("failed to open tick file {}", path.display()))?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

impl Iterator for RawTickReader {
    type Item = Result<RawTick>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e).context(format!(
                        "failed to read {}:{}",
                        self.path.display(),
                        self.line_no
                    ))))
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).with_context(|| {
                format!("failed to parse tick at {}:{}", self.path.display(), self.line_no)
            }));
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// One output row: `timestamp,vpin`.
#[derive(Debug, Serialize)]
struct SampleRow {
    timestamp: String,
    vpin: f64,
}

impl From<&VpinSample> for SampleRow {
    fn from(sample: &VpinSample) -> Self {
        Self {
            timestamp: sample.timestamp.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            vpin: sample.vpin,
        }
    }
}

/// CSV writer for one instrument's VPIN series.
pub struct SampleWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl SampleWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        // Header written up front so the file is well formed even with no rows.
        writer.write_record(["timestamp", "vpin"])?;
        Ok(Self {
            path,
            tmp_path,
            writer,
            rows: 0,
        })
    }

    pub fn write(&mut self, sample: &VpinSample) -> Result<()> {
        self.writer
            .serialize(SampleRow::from(sample))
            .with_context(|| format!("failed to write {}", self.tmp_path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and move the file into place. Returns the number of rows.
    pub fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.tmp_path.display()))?;
        drop(self.writer);
        std::fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("failed to rename {} into place", self.path.display()))?;
        Ok(self.rows)
    }

    /// Drop the partial file without publishing it.
    pub fn discard(self) {
        drop(self.writer);
        let _ = std::fs::remove_file(&self.tmp_path);
    }
}

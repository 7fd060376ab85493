// =============================================================================
// Periods — calendar sub-ranges a run is scoped to
// =============================================================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A labelled, inclusive calendar date range (e.g. one quarter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(label: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }

    /// True if `at` falls on any date from `start` through `end`.
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let d = at.date();
        d >= self.start && d <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// How the bucket size V is chosen when a run spans several periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketSizePolicy {
    /// One V from the instrument's whole history; the accumulator and window
    /// carry across period boundaries.
    Global,
    /// V recomputed from each period's own daily volumes; the pipeline starts
    /// fresh at every period.
    PerPeriod,
}

impl Default for BucketSizePolicy {
    fn default() -> Self {
        Self::Global
    }
}

impl std::fmt::Display for BucketSizePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "Global"),
            Self::PerPeriod => write!(f, "PerPeriod"),
        }
    }
}

fn quarter(label: &str, y0: i32, m0: u32, d0: u32, y1: i32, m1: u32, d1: u32) -> Option<Period> {
    Some(Period::new(
        label,
        NaiveDate::from_ymd_opt(y0, m0, d0)?,
        NaiveDate::from_ymd_opt(y1, m1, d1)?,
    ))
}

/// 2019Q4 through 2021Q1.
pub fn default_quarters() -> Vec<Period> {
    [
        quarter("2019Q4", 2019, 10, 1, 2019, 12, 31),
        quarter("2020Q1", 2020, 1, 1, 2020, 3, 31),
        quarter("2020Q2", 2020, 4, 1, 2020, 6, 30),
        quarter("2020Q3", 2020, 7, 1, 2020, 9, 30),
        quarter("2020Q4", 2020, 10, 1, 2020, 12, 31),
        quarter("2021Q1", 2021, 1, 1, 2021, 3, 31),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Index of the first period containing `at`.
pub fn locate(periods: &[Period], at: NaiveDateTime) -> Option<usize> {
    periods.iter().position(|p| p.contains(at))
}

// =============================================================================
// Shared types used across the VPIN pipeline
// =============================================================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Aggressor side of a trade tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "Buy"),
            Self::Sell => write!(f, "Sell"),
        }
    }
}

/// A single classified trade. Only ticks with a definite side reach the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub volume: u64,
    pub side: Side,
}

impl Tick {
    pub fn new(timestamp: NaiveDateTime, volume: u64, side: Side) -> Self {
        Self {
            timestamp,
            volume,
            side,
        }
    }
}

/// A completed volume bucket. `buy_volume + sell_volume` always equals the
/// bucket size it was cut at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Timestamp of the tick that completed the bucket.
    pub timestamp: NaiveDateTime,
    pub buy_volume: u64,
    pub sell_volume: u64,
}

impl Bucket {
    pub fn total(&self) -> u64 {
        self.buy_volume + self.sell_volume
    }

    /// |buy - sell| for this bucket.
    pub fn imbalance(&self) -> u64 {
        self.buy_volume.abs_diff(self.sell_volume)
    }
}

/// One VPIN observation, stamped with the bucket that completed the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VpinSample {
    pub timestamp: NaiveDateTime,
    pub vpin: f64,
}

/// Pipeline phase: no estimate until the window first fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Warmup,
    Steady,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Warmup
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warmup => write!(f, "Warmup"),
            Self::Steady => write!(f, "Steady"),
        }
    }
}

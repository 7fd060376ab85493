// =============================================================================
// Tick flag classification — raw broker ticks to Buy/Sell trades
// =============================================================================
//
// The terminal tags every tick with a bit mask. Two bits matter here:
//
//   32  TICK_FLAG_BUY   last trade was buyer-initiated
//   64  TICK_FLAG_SELL  last trade was seller-initiated
//
// Ticks with both bits set (simultaneous buy and sell) or neither set carry
// no usable direction and are dropped before they reach the bucketizer, as
// are ticks without positive volume.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Side, Tick};

pub const TICK_FLAG_BUY: u32 = 32;
pub const TICK_FLAG_SELL: u32 = 64;

/// Direction implied by a tick's flag mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickClass {
    Buy,
    Sell,
    Both,
    Neither,
}

impl TickClass {
    pub fn from_flags(flags: u32) -> Self {
        match (flags & TICK_FLAG_BUY != 0, flags & TICK_FLAG_SELL != 0) {
            (true, true) => Self::Both,
            (true, false) => Self::Buy,
            (false, true) => Self::Sell,
            (false, false) => Self::Neither,
        }
    }

    pub fn side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::Both | Self::Neither => None,
        }
    }
}

/// A tick as recorded by the acquisition layer, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTick {
    pub ticktime: NaiveDateTime,
    pub flags: u32,
    pub volume: i64,
}

impl RawTick {
    pub fn class(&self) -> TickClass {
        TickClass::from_flags(self.flags)
    }
}

/// Counts of raw ticks that did not make it through classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub accepted: u64,
    pub both: u64,
    pub neither: u64,
    pub non_positive_volume: u64,
}

impl FilterStats {
    pub fn dropped(&self) -> u64 {
        self.both + self.neither + self.non_positive_volume
    }
}

/// Classifies raw ticks and keeps only definite trades.
#[derive(Debug, Default)]
pub struct TickFilter {
    stats: FilterStats,
}

impl TickFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, raw: &RawTick) -> Option<Tick> {
        let side = match raw.class() {
            TickClass::Both => {
                self.stats.both += 1;
                return None;
            }
            TickClass::Neither => {
                self.stats.neither += 1;
                return None;
            }
            class => class.side()?,
        };

        if raw.volume <= 0 {
            self.stats.non_positive_volume += 1;
            warn!(at = %raw.ticktime, volume = raw.volume, "dropping tick without positive volume");
            return None;
        }

        self.stats.accepted += 1;
        Some(Tick::new(raw.ticktime, raw.volume as u64, side))
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(flags: u32, volume: i64) -> RawTick {
        RawTick {
            ticktime: NaiveDate::from_ymd_opt(2019, 10, 1)
                .unwrap()
                .and_hms_opt(10, 5, 0)
                .unwrap(),
            flags,
            volume,
        }
    }

    #[test]
    fn flag_bits_map_to_classes() {
        assert_eq!(TickClass::from_flags(32), TickClass::Buy);
        assert_eq!(TickClass::from_flags(64), TickClass::Sell);
        assert_eq!(TickClass::from_flags(96), TickClass::Both);
        assert_eq!(TickClass::from_flags(0), TickClass::Neither);
        // Price-change bits (2 = bid, 4 = ask, 8 = last) do not affect direction.
        assert_eq!(TickClass::from_flags(32 | 8 | 16), TickClass::Buy);
        assert_eq!(TickClass::from_flags(6), TickClass::Neither);
    }

    #[test]
    fn filter_keeps_definite_trades_and_counts_the_rest() {
        let mut f = TickFilter::new();
        let ticks: Vec<Tick> = [raw(32, 100), raw(64, 50), raw(96, 10), raw(8, 10), raw(32, 0)]
            .iter()
            .filter_map(|r| f.classify(r))
            .collect();

        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].side, Side::Buy);
        assert_eq!(ticks[1].side, Side::Sell);
        assert_eq!(ticks[1].volume, 50);

        let s = f.stats();
        assert_eq!(s.accepted, 2);
        assert_eq!(s.both, 1);
        assert_eq!(s.neither, 1);
        assert_eq!(s.non_positive_volume, 1);
        assert_eq!(s.dropped(), 3);
    }

    #[test]
    fn raw_tick_parses_from_json() {
        let r: RawTick =
            serde_json::from_str(r#"{"ticktime":"2020-01-02T10:00:01","flags":56,"volume":300}"#)
                .unwrap();
        assert_eq!(r.class(), TickClass::Buy);
        assert_eq!(r.volume, 300);
    }
}

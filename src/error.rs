// =============================================================================
// Error taxonomy for the VPIN core
// =============================================================================
//
// Two classes of failure:
//   - Input contract violations (a tick with zero volume or out of time
//     order, a zero window).
//     The caller fed something the upstream filter should have removed.
//   - Internal consistency violations (a bucket that does not sum to V, a
//     VPIN outside [0, 1]). These mean bucket construction is broken and the
//     run must stop.
//
// "Not enough buckets yet" is not an error; it is `Ok(None)`.

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VpinError {
    #[error("tick volume must be positive, got {volume}")]
    InvalidTick { volume: u64 },

    #[error("tick at {timestamp} arrived after {previous}")]
    OutOfOrder {
        previous: chrono::NaiveDateTime,
        timestamp: chrono::NaiveDateTime,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bucket buy={buy} sell={sell} does not sum to bucket size {expected}")]
    MalformedBucket { buy: u64, sell: u64, expected: u64 },

    #[error("vpin {value} outside [0, 1] (imbalance={imbalance}, capacity={capacity})")]
    VpinOutOfRange {
        value: f64,
        imbalance: u64,
        capacity: u64,
    },
}

impl VpinError {
    /// True for internal consistency failures that signal a defect in bucket
    /// construction rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedBucket { .. } | Self::VpinOutOfRange { .. }
        )
    }
}

pub type VpinResult<T> = std::result::Result<T, VpinError>;

// =============================================================================
// vpin-flow — volume-clock bucketing and rolling VPIN estimation
// =============================================================================
//
// Core:
//   - `bucketizer`  raw ticks to fixed-volume buckets
//   - `estimator`   rolling imbalance over the last N buckets
//   - `pipeline`    the two combined, per instrument, streaming
//
// Around it:
//   - `tick_flags`   broker flag classification (drops ambiguous ticks)
//   - `bucket_size`  V from historical daily volume
//   - `periods`      calendar scoping and the bucket size policy
//   - `runner`       one instrument end to end
//   - `tick_source`  JSON-lines input, CSV output
//   - `runtime_config`

pub mod bucket_size;
pub mod bucketizer;
pub mod error;
pub mod estimator;
pub mod periods;
pub mod pipeline;
pub mod runner;
pub mod runtime_config;
pub mod tick_flags;
pub mod tick_source;
pub mod types;

pub use bucketizer::{Accumulator, Bucketizer};
pub use error::{VpinError, VpinResult};
pub use estimator::VpinEstimator;
pub use pipeline::{compute_vpin, PipelineSummary, VpinPipeline, VpinStream};
pub use types::{Bucket, Phase, Side, Tick, VpinSample};

//! Metric storage shared by every virtual user of a run.
//!
//! Writers either record directly into the [`Registry`] or buffer samples in a per-worker
//! [`Batch`]. Readers take a [`Snapshot`], which is always consistent with respect to batch
//! flushes.

mod batch;
mod error;
mod key;
mod kind;
mod registry;
mod snapshot;
mod tags;
mod trend;

pub use batch::Batch;
pub use error::{Error, Result};
pub use key::KeyId;
pub use kind::{MetricKind, Sample};
pub use registry::{MetricId, Registry};
pub use snapshot::{
    Aggregate, MetricSnapshot, RateValue, SeriesSnapshot, SeriesValue, Snapshot, per_sec,
};
pub use tags::TagSet;
pub use trend::TrendValue;

//! Metrics crate
//!
//! Measures operations while they run: a background [`ResourceSampler`]
//! snapshots the process, an [`OperationRecorder`] scopes one measured
//! operation at a time and reduces the samples to an [`OperationSummary`],
//! and a [`MetricsStore`] keeps the append-only log.
//!
//! # Example
//! ```rust,no_run
//! use colbench_common::Variant;
//! use colbench_metrics::{MetricsStore, OperationLabel, OperationRecorder, Outcome};
//!
//! # async fn run() -> colbench_metrics::Result<()> {
//! let recorder = OperationRecorder::new(MetricsStore::new());
//! let label = OperationLabel::new("scan", "lineitem", Variant::Column);
//! let measured = recorder.measure(label, || async { Ok(Outcome::new((), 0)) }).await?;
//! println!("{:.3}s", measured.summary.duration.as_secs_f64());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod recorder;
pub mod sampler;
pub mod store;
pub mod summary;

pub use error::{Error, Result};
pub use recorder::{Measured, OperationRecorder, Outcome};
pub use sampler::{ProcessProbe, ProbeReading, ResourceProbe, ResourceSample, ResourceSampler, RunningSampler};
pub use store::{Comparison, MetricsStore};
pub use summary::{MetricRecord, OperationLabel, OperationSummary};

//! Main colbench crate
//!
//! Wires a [`BatchSource`](colbench_common::BatchSource), a chunked
//! [`Workload`] and an [`OperationRecorder`](colbench_metrics::OperationRecorder)
//! into one measured run per storage variant.

pub mod workload;

pub use workload::{measure_run, Workload};

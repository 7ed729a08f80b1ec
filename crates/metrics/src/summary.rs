use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colbench_common::Variant;
use serde::{Deserialize, Serialize};

use crate::sampler::ResourceSample;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What is being measured: (operation, dataset, variant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationLabel {
    pub operation: String,
    pub dataset: String,
    pub variant: Variant,
}

impl OperationLabel {
    pub fn new(operation: impl Into<String>, dataset: impl Into<String>, variant: Variant) -> Self {
        Self { operation: operation.into(), dataset: dataset.into(), variant }
    }
}

impl fmt::Display for OperationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.operation, self.dataset, self.variant)
    }
}

/// Resource profile of one finished scope. Never changes once built.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSummary {
    pub label: OperationLabel,
    pub recorded_at: DateTime<Utc>,
    pub duration: Duration,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory_bytes: f64,
    pub max_memory_bytes: u64,
    /// Last sample minus first.
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub rows_processed: u64,
    pub success: bool,
    pub samples: usize,
}

impl OperationSummary {
    /// Reduces a finished sample sequence. An empty sequence gives zeros.
    pub fn reduce(
        label: OperationLabel,
        recorded_at: DateTime<Utc>,
        duration: Duration,
        samples: &[ResourceSample],
        rows_processed: u64,
        success: bool,
    ) -> Self {
        let count = samples.len();
        let (avg_cpu, max_cpu, avg_memory_bytes, max_memory_bytes) = if count == 0 {
            (0.0, 0.0, 0.0, 0)
        } else {
            let cpu_sum: f64 = samples.iter().map(|s| f64::from(s.cpu_percent)).sum();
            let cpu_max = samples.iter().map(|s| f64::from(s.cpu_percent)).fold(0.0, f64::max);
            let mem_sum: f64 = samples.iter().map(|s| s.memory_bytes as f64).sum();
            let mem_max = samples.iter().map(|s| s.memory_bytes).max().unwrap_or(0);
            (cpu_sum / count as f64, cpu_max, mem_sum / count as f64, mem_max)
        };
        let (disk_read_bytes, disk_write_bytes) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (
                last.disk_read_bytes.saturating_sub(first.disk_read_bytes),
                last.disk_write_bytes.saturating_sub(first.disk_write_bytes),
            ),
            _ => (0, 0),
        };

        Self {
            label,
            recorded_at,
            duration,
            avg_cpu,
            max_cpu,
            avg_memory_bytes,
            max_memory_bytes,
            disk_read_bytes,
            disk_write_bytes,
            rows_processed,
            success,
            samples: count,
        }
    }

    /// The persisted shape, with sizes in MiB.
    pub fn to_record(&self) -> MetricRecord {
        MetricRecord {
            operation: self.label.operation.clone(),
            dataset: self.label.dataset.clone(),
            variant: self.label.variant,
            recorded_at: self.recorded_at,
            duration_seconds: self.duration.as_secs_f64(),
            avg_cpu: self.avg_cpu,
            max_cpu: self.max_cpu,
            avg_memory_mb: self.avg_memory_bytes / BYTES_PER_MB,
            max_memory_mb: self.max_memory_bytes as f64 / BYTES_PER_MB,
            disk_read_mb: self.disk_read_bytes as f64 / BYTES_PER_MB,
            disk_write_mb: self.disk_write_bytes as f64 / BYTES_PER_MB,
            rows_processed: self.rows_processed,
            success: self.success,
        }
    }
}

/// One line of the metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub operation: String,
    pub dataset: String,
    pub variant: Variant,
    pub recorded_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub rows_processed: u64,
    pub success: bool,
}

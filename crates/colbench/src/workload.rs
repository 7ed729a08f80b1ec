use colbench_common::error::Result;
use colbench_common::{BatchSource, BatchStream, Dataset};
use colbench_engine::{column_gt, column_statistics, count_rows, filter_rows, grouped_sum};
use colbench_metrics::{Measured, OperationLabel, OperationRecorder, Outcome};
use tracing::info;

/// A chunked operation driven to completion over one dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Scan,
    Filter { column: String, threshold: f64 },
    Statistics { column: String },
    GroupSum { group_by: String, value: String },
}

impl Workload {
    /// Operation name recorded in the metrics log.
    pub fn name(&self) -> &'static str {
        match self {
            Workload::Scan => "scan",
            Workload::Filter { .. } => "filter",
            Workload::Statistics { .. } => "statistics",
            Workload::GroupSum { .. } => "group_sum",
        }
    }

    /// Columns the workload needs, or `None` to read every column.
    pub fn columns(&self) -> Option<Vec<String>> {
        match self {
            Workload::Scan => None,
            Workload::Filter { column, .. } | Workload::Statistics { column } => Some(vec![column.clone()]),
            Workload::GroupSum { group_by, value } => Some(vec![group_by.clone(), value.clone()]),
        }
    }

    /// Consumes `stream` and returns a one-line result with the rows that
    /// contributed to it.
    pub async fn run(&self, stream: BatchStream) -> Result<Outcome<String>> {
        match self {
            Workload::Scan => {
                let rows = count_rows(stream).await?;
                Ok(Outcome::new(format!("{rows} rows"), rows))
            }
            Workload::Filter { column, threshold } => {
                let rows = count_rows(filter_rows(stream, column_gt(column.clone(), *threshold))).await?;
                Ok(Outcome::new(format!("{rows} rows with {column} > {threshold}"), rows))
            }
            Workload::Statistics { column } => {
                let stats = column_statistics(stream, column).await?;
                let summary = format!(
                    "{column}: count={} mean={:.4} stddev={:.4} min={:?} max={:?}",
                    stats.count, stats.mean, stats.stddev, stats.min, stats.max
                );
                Ok(Outcome::new(summary, stats.count))
            }
            Workload::GroupSum { group_by, value } => {
                let groups = grouped_sum(stream, group_by, value).await?;
                let rows = groups.iter().map(|g| g.count).sum();
                let summary = groups
                    .iter()
                    .map(|g| format!("{}={:.2}", g.key, g.sum))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(Outcome::new(format!("sum({value}) by {group_by}: {summary}"), rows))
            }
        }
    }
}

/// Opens `dataset` and runs `workload` over it inside one measurement scope.
///
/// Opening counts toward the measurement; resolving the dataset does not.
pub async fn measure_run(
    recorder: &OperationRecorder,
    source: &dyn BatchSource,
    dataset: &Dataset,
    workload: &Workload,
    chunk_size: usize,
) -> colbench_metrics::Result<Measured<String>> {
    let label = OperationLabel::new(workload.name(), dataset.name(), dataset.format().variant());
    let columns = workload.columns();
    let measured = recorder
        .measure(label, || async {
            let stream = source.open(dataset, columns.as_deref(), chunk_size).await?;
            workload.run(stream).await
        })
        .await?;
    info!(
        dataset = dataset.name(),
        format = %dataset.format(),
        result = %measured.value,
        "workload finished"
    );
    Ok(measured)
}

//! Single-pass numeric column statistics

use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use colbench_common::error::{Error, Result};
use colbench_common::BatchStream;
use futures::TryStreamExt;

/// Summary of the non-null values of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStatistics {
    pub count: u64,
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Welford running mean and variance.
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

fn numeric_column(batch: &RecordBatch, column: &str) -> Result<Float64Array> {
    let array = batch
        .column_by_name(column)
        .ok_or_else(|| Error::SchemaMismatch(format!("column `{column}` not in batch")))?;
    if !array.data_type().is_numeric() {
        return Err(Error::SchemaMismatch(format!("column `{column}` is {}, not numeric", array.data_type())));
    }
    let values = cast(array, &DataType::Float64)?;
    values
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::Internal("cast to Float64 produced another type".to_string()))
}

/// Count, mean, population standard deviation, min and max of `column`,
/// skipping nulls.
pub async fn column_statistics(mut stream: BatchStream, column: &str) -> Result<ColumnStatistics> {
    let mut acc = Accumulator::default();
    while let Some(batch) = stream.try_next().await? {
        let values = numeric_column(&batch, column)?;
        values.iter().flatten().for_each(|v| acc.push(v));
    }
    let stddev = if acc.count > 0 { (acc.m2 / acc.count as f64).sqrt() } else { 0.0 };
    Ok(ColumnStatistics { count: acc.count, mean: acc.mean, stddev, min: acc.min, max: acc.max })
}

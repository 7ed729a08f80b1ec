//! Row filtering

use arrow::array::{BooleanArray, Float64Array};
use arrow::compute::kernels::cmp::gt;
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use colbench_common::error::{Error, Result};
use colbench_common::BatchStream;
use futures::{future, StreamExt, TryStreamExt};

use super::stop_after_error;

/// Keeps the rows for which `predicate` is true. Batches left empty are
/// dropped; a null predicate value drops the row.
pub fn filter_rows<P>(stream: BatchStream, predicate: P) -> BatchStream
where
    P: Fn(&RecordBatch) -> Result<BooleanArray> + Send + 'static,
{
    let filtered = stream.and_then(move |batch| {
        future::ready(predicate(&batch).and_then(|mask| {
            if mask.len() != batch.num_rows() {
                return Err(Error::Internal(format!(
                    "predicate returned {} values for {} rows",
                    mask.len(),
                    batch.num_rows()
                )));
            }
            Ok(filter_record_batch(&batch, &mask)?)
        }))
    });
    stop_after_error(Box::pin(filtered.try_filter(|batch| future::ready(batch.num_rows() > 0))))
}

/// Predicate `column > value` over any numeric column.
pub fn column_gt(column: impl Into<String>, value: f64) -> impl Fn(&RecordBatch) -> Result<BooleanArray> + Send + 'static {
    let column = column.into();
    move |batch: &RecordBatch| {
        let array = batch
            .column_by_name(&column)
            .ok_or_else(|| Error::SchemaMismatch(format!("column `{column}` not in batch")))?;
        if !array.data_type().is_numeric() {
            return Err(Error::SchemaMismatch(format!("column `{column}` is {}, not numeric", array.data_type())));
        }
        let values = cast(array, &DataType::Float64)?;
        Ok(gt(&values, &Float64Array::new_scalar(value))?)
    }
}

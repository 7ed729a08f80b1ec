//! Column selection on already-read batches

use arrow::record_batch::RecordBatch;
use colbench_common::error::{Error, Result};
use colbench_common::BatchStream;
use futures::{future, TryStreamExt};

use super::stop_after_error;

fn indices(batch: &RecordBatch, columns: &[String]) -> Result<Vec<usize>> {
    let schema = batch.schema();
    columns
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .map_err(|_| Error::SchemaMismatch(format!("column `{name}` not in batch")))
        })
        .collect()
}

/// Restricts every batch to `columns`, in that order. An empty list keeps
/// all columns.
pub fn select_columns(stream: BatchStream, columns: Vec<String>) -> BatchStream {
    if columns.is_empty() {
        return stream;
    }
    let projected = stream.and_then(move |batch| {
        future::ready(indices(&batch, &columns).and_then(|idx| Ok(batch.project(&idx)?)))
    });
    stop_after_error(Box::pin(projected))
}

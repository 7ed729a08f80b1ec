//! The format- and location-agnostic batch reading contract.

use std::pin::Pin;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::Stream;

use crate::dataset::{Dataset, Format};
use crate::error::{Error, Result};

/// Default number of rows per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Finite, non-restartable stream of batches. A decode or transport error is
/// always the last item.
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// Produces bounded batches for a logical table, whatever its encoding.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Resolves a table name to a dataset handle. `format` overrides suffix
    /// detection.
    async fn resolve(&self, table: &str, format: Option<Format>) -> Result<Dataset>;

    /// Opens a fresh iteration over `dataset`. Every call re-establishes the
    /// underlying file or connection.
    async fn open(
        &self,
        dataset: &Dataset,
        columns: Option<&[String]>,
        chunk_size: usize,
    ) -> Result<BatchStream>;
}

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::ConfigurationError("chunk size must be positive".to_string()));
    }
    Ok(())
}

/// Restricts a batch to `indices`, in that order.
pub fn project_batch(batch: &RecordBatch, indices: Option<&[usize]>) -> Result<RecordBatch> {
    match indices {
        Some(indices) => Ok(batch.project(indices)?),
        None => Ok(batch.clone()),
    }
}

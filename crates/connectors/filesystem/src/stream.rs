//! Bridges blocking decoders to async batch streams.

use std::sync::Arc;

use colbench_common::error::{Error, Result};
use colbench_common::source::{project_batch, validate_chunk_size};
use colbench_common::{BatchStream, Dataset};
use tokio::runtime::Handle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::byte_source::ByteSource;
use crate::format::{BatchIter, FormatAdapter};

/// Drives `batches` on a blocking worker and exposes them as a stream.
///
/// The worker reserves a channel slot before decoding each batch, so at most
/// one finished batch waits beyond the one the consumer holds, however large
/// the dataset is. The worker stops after the first error or once the consumer
/// drops the stream. A worker that panics ends the stream with
/// `Error::Internal` instead of a silent early end.
pub fn into_stream(mut batches: BatchIter) -> BatchStream {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let runtime = Handle::current();
    let worker_tx = tx.clone();
    let worker = tokio::task::spawn_blocking(move || loop {
        let Ok(permit) = runtime.block_on(worker_tx.reserve()) else {
            debug!("batch stream dropped by consumer, stopping decoder");
            break;
        };
        let Some(item) = batches.next() else {
            break;
        };
        let failed = item.is_err();
        permit.send(item);
        if failed {
            break;
        }
    });
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            if e.is_panic() {
                warn!("decoder worker panicked, ending batch stream with an error");
                let _ = tx.send(Err(Error::Internal("decoder worker panicked".to_string()))).await;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Opens `source` with `adapter` and returns a bounded batch stream.
///
/// Projection is validated against the dataset before any decoding starts.
/// Adapters that cannot push projection down have it applied here, after the
/// full row has been decoded.
pub async fn open_with_adapter(
    adapter: Arc<dyn FormatAdapter>,
    source: Arc<dyn ByteSource>,
    dataset: &Dataset,
    columns: Option<&[String]>,
    chunk_size: usize,
) -> Result<BatchStream> {
    validate_chunk_size(chunk_size)?;
    let projection = dataset.projection_indices(columns)?;
    let schema = dataset.schema();

    let batches = tokio::task::spawn_blocking(move || -> Result<BatchIter> {
        if adapter.pushes_down_projection() {
            return adapter.decode(source, schema, projection.as_deref(), chunk_size);
        }
        let full = adapter.decode(source, schema, None, chunk_size)?;
        match projection {
            Some(indices) => Ok(Box::new(
                full.map(move |item| item.and_then(|batch| project_batch(&batch, Some(&indices)))),
            )),
            None => Ok(full),
        }
    })
    .await
    .map_err(|e| Error::Internal(format!("decoder setup task failed: {e}")))??;

    Ok(into_stream(batches))
}

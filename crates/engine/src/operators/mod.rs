//! Operators applied to already-read batches

use colbench_common::BatchStream;
use futures::{future, StreamExt};

pub mod aggregate;
pub mod filter;
pub mod projection;
pub mod statistics;

/// Ends `stream` right after its first error.
pub(crate) fn stop_after_error(stream: BatchStream) -> BatchStream {
    Box::pin(stream.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
    }))
}

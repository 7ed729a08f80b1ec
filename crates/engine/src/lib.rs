//! Engine crate
//!
//! Chunked operations over a [`BatchStream`]. Every operation consumes its
//! input one batch at a time, so memory stays bounded by the chunk size.
//!
//! # Example
//! ```rust,no_run
//! use colbench_common::BatchStream;
//! use colbench_engine::{column_gt, count_rows, filter_rows};
//!
//! # async fn run(stream: BatchStream) -> colbench_common::Result<()> {
//! let heavy = filter_rows(stream, column_gt("l_quantity", 45.0));
//! println!("{} rows", count_rows(heavy).await?);
//! # Ok(())
//! # }
//! ```

use colbench_common::error::Result;
use colbench_common::BatchStream;
use futures::TryStreamExt;

pub mod operators;

pub use operators::aggregate::{grouped_sum, GroupSum};
pub use operators::filter::{column_gt, filter_rows};
pub use operators::projection::select_columns;
pub use operators::statistics::{column_statistics, ColumnStatistics};

/// Total rows in `stream`.
pub async fn count_rows(mut stream: BatchStream) -> Result<u64> {
    let mut rows = 0u64;
    while let Some(batch) = stream.try_next().await? {
        rows += batch.num_rows() as u64;
    }
    Ok(rows)
}

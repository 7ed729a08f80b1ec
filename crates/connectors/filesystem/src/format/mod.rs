//! Format adapters: one decoder per physical encoding.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use colbench_common::error::Result;
use colbench_common::Format;

use crate::byte_source::ByteSource;

pub mod delimited;
pub mod parquet;

pub use self::delimited::DelimitedAdapter;
pub use self::parquet::ParquetAdapter;

/// Blocking iterator of decoded batches. An error is always the last item.
pub type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// Decodes the bytes of one encoding into record batches.
pub trait FormatAdapter: Send + Sync {
    fn format(&self) -> Format;

    /// Whether `decode` honours the projection itself. Row encodings decode
    /// every column and leave projection to the caller.
    fn pushes_down_projection(&self) -> bool;

    /// Reads the schema and, when the encoding records it, the row count.
    fn schema(&self, source: Arc<dyn ByteSource>) -> Result<(SchemaRef, Option<u64>)>;

    /// Starts decoding `source` as `schema` in batches of at most `chunk_size`
    /// rows. `projection` holds field indices of `schema`.
    fn decode(
        &self,
        source: Arc<dyn ByteSource>,
        schema: SchemaRef,
        projection: Option<&[usize]>,
        chunk_size: usize,
    ) -> Result<BatchIter>;
}

/// Knobs that shape adapter selection.
#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    /// Delimiter for `Format::Csv`. `Format::Tbl` always uses `|`.
    pub csv_delimiter: u8,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self { csv_delimiter: b',' }
    }
}

/// Picks the adapter for a format tag. Resolved once per `open`.
pub fn adapter_for(format: Format, options: AdapterOptions) -> Arc<dyn FormatAdapter> {
    match format {
        Format::Parquet => Arc::new(ParquetAdapter),
        Format::Csv => Arc::new(DelimitedAdapter::csv(options.csv_delimiter)),
        Format::Tbl => Arc::new(DelimitedAdapter::tbl()),
    }
}

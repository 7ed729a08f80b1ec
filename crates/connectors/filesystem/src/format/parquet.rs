use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use colbench_common::error::Result;
use colbench_common::Format;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use tracing::debug;

use super::{BatchIter, FormatAdapter};
use crate::byte_source::{ByteSource, SourceReader};

/// Columnar adapter. Only the requested column chunks are read.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetAdapter;

impl ParquetAdapter {
    fn builder(
        &self,
        reader: &SourceReader,
    ) -> Result<ParquetRecordBatchReaderBuilder<SourceReader>> {
        ParquetRecordBatchReaderBuilder::try_new(reader.clone()).map_err(|e| reader.decode_error(e))
    }
}

/// Splits a requested projection into the ascending mask parquet reads and
/// the reordering that restores the requested order.
fn plan_projection(requested: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut roots = requested.to_vec();
    roots.sort_unstable();
    roots.dedup();
    let reorder = requested
        .iter()
        .map(|idx| roots.binary_search(idx).unwrap_or_default())
        .collect();
    (roots, reorder)
}

impl FormatAdapter for ParquetAdapter {
    fn format(&self) -> Format {
        Format::Parquet
    }

    fn pushes_down_projection(&self) -> bool {
        true
    }

    fn schema(&self, source: Arc<dyn ByteSource>) -> Result<(SchemaRef, Option<u64>)> {
        let reader = SourceReader::new(source);
        let builder = self.builder(&reader)?;
        let rows = builder.metadata().file_metadata().num_rows();
        Ok((builder.schema().clone(), u64::try_from(rows).ok()))
    }

    fn decode(
        &self,
        source: Arc<dyn ByteSource>,
        _schema: SchemaRef,
        projection: Option<&[usize]>,
        chunk_size: usize,
    ) -> Result<BatchIter> {
        let describe = source.describe();
        let reader = SourceReader::new(source);
        let mut builder = self.builder(&reader)?.with_batch_size(chunk_size);

        let reorder = match projection {
            Some(requested) => {
                let (roots, reorder) = plan_projection(requested);
                debug!(file = %describe, columns = ?roots, "parquet projection pushdown");
                let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
                builder = builder.with_projection(mask);
                Some(reorder)
            }
            None => None,
        };

        let batches = builder.build().map_err(|e| reader.decode_error(e))?;
        let iter = batches.map(move |item| {
            let batch = item.map_err(|e| reader.decode_error(e))?;
            match &reorder {
                Some(order) => Ok(batch.project(order)?),
                None => Ok(batch),
            }
        });
        Ok(Box::new(iter))
    }
}

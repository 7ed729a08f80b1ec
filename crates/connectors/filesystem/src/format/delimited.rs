use std::io::Read;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringBuilder};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::csv::reader::Format as CsvFormat;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use colbench_common::error::{Error, Result};
use colbench_common::Format;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};

use super::{BatchIter, FormatAdapter};
use crate::byte_source::ByteSource;

/// Rows sampled to infer column types when no schema is declared.
const INFER_SAMPLE_ROWS: usize = 1_000;

/// Builder capacity cap, so a huge chunk size does not preallocate.
const MAX_PREALLOCATED_ROWS: usize = 8_192;

/// Row-oriented adapter for delimited text.
///
/// Every column of a row is decoded before any projection can happen, so
/// `decode` always yields full-width batches.
#[derive(Debug, Clone)]
pub struct DelimitedAdapter {
    format: Format,
    delimiter: u8,
    has_header: bool,
    trailing_delimiter: bool,
}

impl DelimitedAdapter {
    /// Headered text with a configurable delimiter.
    pub fn csv(delimiter: u8) -> Self {
        Self { format: Format::Csv, delimiter, has_header: true, trailing_delimiter: false }
    }

    /// TPC-H `.tbl`: `|` separated, no header, every line ends with `|`.
    pub fn tbl() -> Self {
        Self { format: Format::Tbl, delimiter: b'|', has_header: false, trailing_delimiter: true }
    }

    fn reader(&self, input: Box<dyn Read + Send>) -> csv::Reader<Box<dyn Read + Send>> {
        ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .quoting(self.format != Format::Tbl)
            .flexible(true)
            .from_reader(input)
    }

    /// Number of real fields in `record`, ignoring a trailing delimiter.
    fn width(&self, record: &StringRecord) -> usize {
        let len = record.len();
        if self.trailing_delimiter && len > 0 && record.get(len - 1) == Some("") {
            len - 1
        } else {
            len
        }
    }
}

fn arrow_error(source: &dyn ByteSource, err: ArrowError) -> Error {
    match err {
        ArrowError::IoError(_, io) => Error::from_reader(io),
        ArrowError::CsvError(msg) => Error::DecodeError(format!("{}: {}", source.describe(), msg)),
        other => Error::DecodeError(format!("{}: {}", source.describe(), other)),
    }
}

fn csv_error(source: &dyn ByteSource, err: csv::Error) -> Error {
    if err.is_io_error() {
        if let csv::ErrorKind::Io(io) = err.into_kind() {
            return Error::from_reader(io);
        }
        return Error::DecodeError(format!("{}: unreadable input", source.describe()));
    }
    Error::DecodeError(format!("{}: {}", source.describe(), err))
}

impl FormatAdapter for DelimitedAdapter {
    fn format(&self) -> Format {
        self.format
    }

    fn pushes_down_projection(&self) -> bool {
        false
    }

    fn schema(&self, source: Arc<dyn ByteSource>) -> Result<(SchemaRef, Option<u64>)> {
        let sniffer = CsvFormat::default().with_header(self.has_header).with_delimiter(self.delimiter);
        let (inferred, _) = sniffer
            .infer_schema(source.reader(0)?, Some(INFER_SAMPLE_ROWS))
            .map_err(|e| arrow_error(source.as_ref(), e))?;

        let mut fields: Vec<Field> = inferred
            .fields()
            .iter()
            .map(|field| {
                let data_type = match field.data_type() {
                    DataType::Null => DataType::Utf8,
                    other => other.clone(),
                };
                Field::new(field.name().trim(), data_type, true)
            })
            .collect();
        if self.trailing_delimiter && inferred.fields().last().is_some_and(|f| f.data_type() == &DataType::Null) {
            fields.pop();
        }
        Ok((Arc::new(Schema::new(fields)), None))
    }

    fn decode(
        &self,
        source: Arc<dyn ByteSource>,
        schema: SchemaRef,
        _projection: Option<&[usize]>,
        chunk_size: usize,
    ) -> Result<BatchIter> {
        let records = self.reader(source.reader(0)?).into_records();
        Ok(Box::new(DelimitedBatches {
            adapter: self.clone(),
            source,
            records,
            schema,
            chunk_size,
            done: false,
        }))
    }
}

struct DelimitedBatches {
    adapter: DelimitedAdapter,
    source: Arc<dyn ByteSource>,
    records: StringRecordsIntoIter<Box<dyn Read + Send>>,
    schema: SchemaRef,
    chunk_size: usize,
    done: bool,
}

impl DelimitedBatches {
    fn next_chunk(&mut self) -> Result<Option<RecordBatch>> {
        let fields = self.schema.fields();
        let rows_hint = self.chunk_size.min(MAX_PREALLOCATED_ROWS);
        let mut builders: Vec<StringBuilder> =
            fields.iter().map(|_| StringBuilder::with_capacity(rows_hint, rows_hint * 8)).collect();
        let mut rows = 0;

        while rows < self.chunk_size {
            let record = match self.records.next() {
                Some(record) => record.map_err(|e| csv_error(self.source.as_ref(), e))?,
                None => break,
            };
            let width = self.adapter.width(&record);
            if width != fields.len() {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(Error::DecodeError(format!(
                    "{}: line {} has {} fields, expected {}",
                    self.source.describe(),
                    line,
                    width,
                    fields.len()
                )));
            }
            for (builder, value) in builders.iter_mut().zip(record.iter()) {
                if value.is_empty() {
                    builder.append_null();
                } else {
                    builder.append_value(value);
                }
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }

        let options = CastOptions { safe: false, ..Default::default() };
        let columns = builders
            .iter_mut()
            .zip(fields.iter())
            .map(|(builder, field)| {
                let text: ArrayRef = Arc::new(builder.finish());
                if field.data_type() == &DataType::Utf8 {
                    return Ok(text);
                }
                cast_with_options(&text, field.data_type(), &options).map_err(|e| {
                    Error::DecodeError(format!("{}: column `{}`: {}", self.source.describe(), field.name(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(RecordBatch::try_new(self.schema.clone(), columns)?))
    }
}

impl Iterator for DelimitedBatches {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

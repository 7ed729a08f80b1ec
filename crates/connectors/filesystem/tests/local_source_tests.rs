use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use colbench_common::{BatchSource, Error, Format};
use colbench_connector_filesystem::format::{DelimitedAdapter, FormatAdapter};
use colbench_connector_filesystem::stream::open_with_adapter;
use colbench_connector_filesystem::{adapter_for, AdapterOptions, ByteSource, LocalFile, LocalSource};
use futures::{StreamExt, TryStreamExt};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

const COLUMNS: usize = 16;

fn wide_schema() -> SchemaRef {
    Arc::new(Schema::new(
        (0..COLUMNS).map(|c| Field::new(format!("c{c}"), DataType::Int64, false)).collect::<Vec<_>>(),
    ))
}

fn cell(row: usize, col: usize) -> i64 {
    (row * COLUMNS + col) as i64
}

fn write_parquet(path: &Path, rows: usize) {
    let schema = wide_schema();
    let props = WriterProperties::builder().set_max_row_group_size(2_000).build();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props)).unwrap();
    let mut start = 0;
    while start < rows {
        let end = (start + 1_000).min(rows);
        let columns: Vec<ArrayRef> = (0..COLUMNS)
            .map(|c| Arc::new(Int64Array::from_iter_values((start..end).map(|r| cell(r, c)))) as ArrayRef)
            .collect();
        writer.write(&RecordBatch::try_new(schema.clone(), columns).unwrap()).unwrap();
        start = end;
    }
    writer.close().unwrap();
}

fn write_delimited(path: &Path, rows: usize, delimiter: char, header: bool, trailing: bool) {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path).unwrap());
    if header {
        let names: Vec<String> = (0..COLUMNS).map(|c| format!("c{c}")).collect();
        writeln!(out, "{}", names.join(&delimiter.to_string())).unwrap();
    }
    for r in 0..rows {
        let values: Vec<String> = (0..COLUMNS).map(|c| cell(r, c).to_string()).collect();
        let mut line = values.join(&delimiter.to_string());
        if trailing {
            line.push(delimiter);
        }
        writeln!(out, "{line}").unwrap();
    }
}

/// Writes `lineitem` in all three encodings and returns a source that knows
/// the declared schema for the delimited ones.
fn fixture(dir: &Path, rows: usize) -> LocalSource {
    write_parquet(&dir.join("lineitem.parquet"), rows);
    write_delimited(&dir.join("lineitem.csv"), rows, ',', true, false);
    write_delimited(&dir.join("lineitem.tbl"), rows, '|', false, true);
    LocalSource::new(dir).with_declared_schema("lineitem", wide_schema())
}

async fn collect(
    source: &LocalSource,
    format: Format,
    columns: Option<&[String]>,
    chunk_size: usize,
) -> Vec<RecordBatch> {
    source
        .read_batches("lineitem", Some(format), columns, chunk_size)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

fn column_values(batches: &[RecordBatch], name: &str) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| {
            let col = b.column_by_name(name).unwrap().as_any().downcast_ref::<Int64Array>().unwrap();
            col.values().to_vec()
        })
        .collect()
}

#[tokio::test]
async fn batches_cover_dataset_once_in_order_for_every_chunk_size() {
    let dir = tempfile::tempdir().unwrap();
    let rows = 6_000;
    let source = fixture(dir.path(), rows);
    let expected: Vec<i64> = (0..rows).map(|r| cell(r, 5)).collect();

    for format in [Format::Parquet, Format::Csv, Format::Tbl] {
        for chunk_size in [1_000, 999, 4_096, 10_000] {
            let batches = collect(&source, format, None, chunk_size).await;
            assert!(batches.iter().all(|b| b.num_rows() <= chunk_size), "{format} chunk {chunk_size}");
            assert_eq!(column_values(&batches, "c5"), expected, "{format} chunk {chunk_size}");
        }
    }
}

#[tokio::test]
async fn projection_yields_exactly_requested_columns() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture(dir.path(), 500);
    let columns = vec!["c9".to_string(), "c1".to_string()];

    for format in [Format::Parquet, Format::Csv, Format::Tbl] {
        let batches = collect(&source, format, Some(&columns), 200).await;
        for batch in &batches {
            let names: Vec<_> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
            assert_eq!(names, columns, "{format}");
        }
        assert_eq!(column_values(&batches, "c1"), (0..500).map(|r| cell(r, 1)).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn sixteen_columns_three_projected_six_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture(dir.path(), 6_000);
    let columns = vec!["c0".to_string(), "c7".to_string(), "c15".to_string()];

    // Columnar: pushdown gives 6 narrow batches.
    let parquet = collect(&source, Format::Parquet, Some(&columns), 1_000).await;
    assert_eq!(parquet.len(), 6);
    assert!(parquet.iter().all(|b| b.num_rows() <= 1_000 && b.num_columns() == 3));

    // Row-delimited: the adapter itself decodes all 16 columns per batch.
    let tbl = dir.path().join("lineitem.tbl");
    let full: Vec<RecordBatch> = DelimitedAdapter::tbl()
        .decode(Arc::new(LocalFile::open(&tbl).unwrap()), wide_schema(), None, 1_000)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(full.len(), 6);
    assert!(full.iter().all(|b| b.num_columns() == 16));

    // Same row partition once projection is applied downstream.
    let projected = collect(&source, Format::Tbl, Some(&columns), 1_000).await;
    let partition = |batches: &[RecordBatch]| batches.iter().map(|b| b.num_rows()).collect::<Vec<_>>();
    assert_eq!(partition(&projected), partition(&parquet));
    assert!(projected.iter().all(|b| b.num_columns() == 3));
}

#[tokio::test]
async fn reopening_starts_from_the_beginning() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture(dir.path(), 300);
    let dataset = source.resolve("lineitem.parquet", None).await.unwrap();
    assert_eq!(dataset.row_count(), Some(300));

    let mut first = source.open(&dataset, None, 100).await.unwrap();
    first.next().await.unwrap().unwrap();
    drop(first);

    let again: Vec<RecordBatch> = source.open(&dataset, None, 100).await.unwrap().try_collect().await.unwrap();
    assert_eq!(column_values(&again, "c0"), (0..300).map(|r| cell(r, 0)).collect::<Vec<_>>());
}

#[tokio::test]
async fn unsupported_extension_fails_before_iteration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lineitem.xyz"), "whatever").unwrap();
    let source = LocalSource::new(dir.path());

    let err = source.read_batches("lineitem.xyz", None, None, 100).await.err().unwrap();
    assert!(matches!(err, Error::UnsupportedFormat(_)), "{err:?}");
}

#[tokio::test]
async fn missing_table_is_dataset_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let source = LocalSource::new(dir.path());

    let err = source.resolve("orders.parquet", None).await.unwrap_err();
    assert!(matches!(err, Error::DatasetNotFound(_)));
    let err = source.resolve("orders", None).await.unwrap_err();
    assert!(matches!(err, Error::DatasetNotFound(_)));
}

#[tokio::test]
async fn unknown_projection_column_is_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture(dir.path(), 10);
    let dataset = source.resolve("lineitem", Some(Format::Csv)).await.unwrap();

    let err = source.open(&dataset, Some(&["l_comment".to_string()]), 10).await.err().unwrap();
    assert!(matches!(err, Error::SchemaMismatch(_)));
}

#[tokio::test]
async fn decode_error_ends_stream_after_valid_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    let mut body = String::from("id\n");
    for i in 0..10 {
        body.push_str(&format!("{i}\n"));
    }
    body.push_str("not-a-number\n11\n");
    std::fs::write(&path, body).unwrap();

    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let source = LocalSource::new(dir.path()).with_declared_schema("broken", schema);
    let items: Vec<_> = source.read_batches("broken.csv", None, None, 5).await.unwrap().collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().num_rows(), 5);
    assert_eq!(items[1].as_ref().unwrap().num_rows(), 5);
    assert!(matches!(items[2], Err(Error::DecodeError(_))));
}

#[tokio::test]
async fn custom_delimiter_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("nation.csv"), "n_key;n_name\n0;ALGERIA\n1;ARGENTINA\n").unwrap();
    let source = LocalSource::new(dir.path()).with_delimiter(b';');

    let batches: Vec<RecordBatch> =
        source.read_batches("nation", None, None, 10).await.unwrap().try_collect().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].num_columns(), 2);
    assert_eq!(batches[0].column(1).len(), 2);
}

/// A local file that tallies every byte handed to a decoder.
#[derive(Debug)]
struct MeteredFile {
    file: LocalFile,
    read: Arc<AtomicU64>,
}

struct MeteredReader {
    inner: Box<dyn Read + Send>,
    read: Arc<AtomicU64>,
}

impl Read for MeteredReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

impl ByteSource for MeteredFile {
    fn describe(&self) -> String {
        self.file.describe()
    }

    fn len(&self) -> u64 {
        self.file.len()
    }

    fn read_range(&self, range: Range<u64>) -> colbench_common::Result<Bytes> {
        let bytes = self.file.read_range(range)?;
        self.read.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(bytes)
    }

    fn reader(&self, start: u64) -> colbench_common::Result<Box<dyn Read + Send>> {
        Ok(Box::new(MeteredReader { inner: self.file.reader(start)?, read: self.read.clone() }))
    }
}

/// Opens `lineitem` in `format` over `rows` rows, holds the first batch while
/// the decoder runs free, and returns the bytes pulled by then and the file
/// size.
async fn bytes_read_while_holding_first_batch(rows: usize, format: Format) -> (u64, u64) {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture(dir.path(), rows);
    let dataset = source.resolve("lineitem", Some(format)).await.unwrap();
    let file = LocalFile::open(dir.path().join(format!("lineitem.{}", format.extension()))).unwrap();
    let size = file.len();
    let read = Arc::new(AtomicU64::new(0));
    let metered = Arc::new(MeteredFile { file, read: read.clone() });

    let adapter = adapter_for(format, AdapterOptions::default());
    let mut stream = open_with_adapter(adapter, metered, &dataset, None, 1_000).await.unwrap();
    let held = stream.next().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let while_held = read.load(Ordering::SeqCst);

    let rest: usize = stream.map(|b| b.unwrap().num_rows()).collect::<Vec<_>>().await.iter().sum();
    assert_eq!(held.num_rows() + rest, rows, "{format}");
    (while_held, size)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_consumer_bounds_decoding_regardless_of_dataset_size() {
    for format in [Format::Parquet, Format::Tbl] {
        let (small, _) = bytes_read_while_holding_first_batch(10_000, format).await;
        let (large, large_size) = bytes_read_while_holding_first_batch(100_000, format).await;

        // Ten times the rows must not mean ten times the bytes in flight.
        assert!(large < small * 2, "{format}: {small} bytes at 10k rows, {large} at 100k");
        assert!(large < large_size / 10, "{format}: pulled {large} of {large_size} bytes");
    }
}

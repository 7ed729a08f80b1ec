//! Filesystem connector
//!
//! Format adapters plus a [`BatchSource`] over a local data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use colbench_common::error::{Error, Result};
use colbench_common::{BatchSource, BatchStream, Dataset, Format, Location};
use tracing::{debug, info};

pub mod byte_source;
pub mod format;
pub mod stream;

pub use byte_source::{ByteSource, LocalFile};
pub use format::{adapter_for, AdapterOptions, FormatAdapter};

/// A [`BatchSource`] reading files under one root directory.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
    options: AdapterOptions,
    declared: HashMap<String, SchemaRef>,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), options: AdapterOptions::default(), declared: HashMap::new() }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.options.csv_delimiter = delimiter;
        self
    }

    /// Declares column names and types for a delimited table, overriding
    /// header or positional inference.
    pub fn with_declared_schema(mut self, table: impl Into<String>, schema: SchemaRef) -> Self {
        self.declared.insert(table.into(), schema);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a table name to a file and format tag.
    ///
    /// An explicit tag wins; otherwise the file suffix decides, and a bare
    /// name probes the known extensions in order.
    fn locate(&self, table: &str, format: Option<Format>) -> Result<(PathBuf, Format)> {
        let has_extension = Path::new(table).extension().is_some();
        match format {
            Some(format) if has_extension => Ok((self.root.join(table), format)),
            Some(format) => Ok((self.root.join(format!("{table}.{}", format.extension())), format)),
            None if has_extension => Ok((self.root.join(table), Format::from_path(table)?)),
            None => Format::probe_order()
                .map(|(ext, format)| (self.root.join(format!("{table}.{ext}")), format))
                .find(|(path, _)| path.is_file())
                .ok_or_else(|| {
                    Error::DatasetNotFound(format!("no known file for table `{table}` in {}", self.root.display()))
                }),
        }
    }

    /// Resolves and opens `table` in one step.
    pub async fn read_batches(
        &self,
        table: &str,
        format: Option<Format>,
        columns: Option<&[String]>,
        chunk_size: usize,
    ) -> Result<BatchStream> {
        let dataset = self.resolve(table, format).await?;
        self.open(&dataset, columns, chunk_size).await
    }
}

fn table_stem(table: &str) -> String {
    Path::new(table)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| table.to_string())
}

#[async_trait]
impl BatchSource for LocalSource {
    async fn resolve(&self, table: &str, format: Option<Format>) -> Result<Dataset> {
        let (path, format) = self.locate(table, format)?;
        let file = LocalFile::open(&path)?;
        let name = table_stem(table);
        let adapter = adapter_for(format, self.options);

        let declared = match format {
            Format::Parquet => None,
            Format::Csv | Format::Tbl => self.declared.get(&name).cloned(),
        };
        let (schema, rows) = match declared {
            Some(schema) => (schema, None),
            None => tokio::task::spawn_blocking(move || adapter.schema(Arc::new(file)))
                .await
                .map_err(|e| Error::Internal(format!("schema task failed: {e}")))??,
        };

        info!(
            table = %name,
            path = %path.display(),
            format = %format,
            columns = schema.fields().len(),
            rows = ?rows,
            "resolved local dataset"
        );
        Ok(Dataset::new(name, Location::Local(path), format, schema, rows))
    }

    async fn open(
        &self,
        dataset: &Dataset,
        columns: Option<&[String]>,
        chunk_size: usize,
    ) -> Result<BatchStream> {
        let Location::Local(path) = dataset.location() else {
            return Err(Error::ConfigurationError(format!(
                "dataset `{}` at {} is not a local file",
                dataset.name(),
                dataset.location()
            )));
        };
        let file = LocalFile::open(path)?;
        debug!(table = dataset.name(), chunk_size, ?columns, "opening local batch stream");
        let adapter = adapter_for(dataset.format(), self.options);
        stream::open_with_adapter(adapter, Arc::new(file), dataset, columns, chunk_size).await
    }
}

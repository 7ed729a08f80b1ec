use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Physical encoding of a dataset file or object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Apache Parquet, read column by column.
    Parquet,
    /// Delimited text with a header row (`.csv`, `.dat`).
    Csv,
    /// TPC-H pipe-delimited text without header (`.tbl`).
    Tbl,
}

/// Fixed suffix table used for format detection. Order is also the probe
/// order used when a table name carries no extension.
const EXTENSIONS: &[(&str, Format)] = &[
    ("parquet", Format::Parquet),
    ("csv", Format::Csv),
    ("tbl", Format::Tbl),
    ("dat", Format::Csv),
];

impl Format {
    /// Detects the format from an exact file-name suffix. Unknown suffixes
    /// fail rather than guess.
    pub fn from_path(path: &str) -> Result<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .ok_or_else(|| Error::UnsupportedFormat(format!("no file extension in `{path}`")))?;
        Self::from_extension(ext)
            .ok_or_else(|| Error::UnsupportedFormat(format!("unrecognized extension `.{ext}` in `{path}`")))
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        EXTENSIONS.iter().find(|(known, _)| *known == ext).map(|(_, format)| *format)
    }

    /// True when `path` ends with one of the known extensions.
    pub fn has_known_extension(path: &str) -> bool {
        Self::from_path(path).is_ok()
    }

    /// Extensions to try, in order, for a table name without one.
    pub fn probe_order() -> impl Iterator<Item = (&'static str, Format)> {
        EXTENSIONS.iter().copied()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Parquet => "parquet",
            Format::Csv => "csv",
            Format::Tbl => "tbl",
        }
    }

    /// Which side of the benchmark this encoding represents.
    pub fn variant(self) -> Variant {
        match self {
            Format::Parquet => Variant::Column,
            Format::Csv | Format::Tbl => Variant::Row,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" => Ok(Format::Parquet),
            "csv" | "dat" => Ok(Format::Csv),
            "tbl" => Ok(Format::Tbl),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Row-oriented or column-oriented side of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Row,
    Column,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Row => f.write_str("row"),
            Variant::Column => f.write_str("column"),
        }
    }
}

/// Where the bytes of a dataset live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    /// Key of an object inside the fetcher's bucket.
    Object(String),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Object(key) => write!(f, "object://{key}"),
        }
    }
}

/// A resolved, immutable dataset handle.
#[derive(Debug, Clone)]
pub struct Dataset {
    inner: Arc<DatasetInner>,
}

#[derive(Debug)]
struct DatasetInner {
    name: String,
    location: Location,
    format: Format,
    schema: SchemaRef,
    row_count: Option<u64>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        location: Location,
        format: Format,
        schema: SchemaRef,
        row_count: Option<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                name: name.into(),
                location,
                format,
                schema,
                row_count,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn location(&self) -> &Location {
        &self.inner.location
    }

    pub fn format(&self) -> Format {
        self.inner.format
    }

    pub fn schema(&self) -> SchemaRef {
        self.inner.schema.clone()
    }

    /// Total rows, when the encoding records it up front.
    pub fn row_count(&self) -> Option<u64> {
        self.inner.row_count
    }

    pub fn column_names(&self) -> Vec<String> {
        self.inner.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    /// Maps a projection to field indices, in the requested order.
    ///
    /// `None` and an empty list both mean every column.
    pub fn projection_indices(&self, columns: Option<&[String]>) -> Result<Option<Vec<usize>>> {
        let columns = match columns {
            Some(columns) if !columns.is_empty() => columns,
            _ => return Ok(None),
        };
        columns
            .iter()
            .map(|name| {
                self.inner.schema.index_of(name).map_err(|_| {
                    Error::SchemaMismatch(format!(
                        "column `{}` not in dataset `{}` (columns: {})",
                        name,
                        self.inner.name,
                        self.column_names().join(", ")
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

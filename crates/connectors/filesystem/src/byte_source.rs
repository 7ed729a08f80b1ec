//! Byte-level access shared by every format adapter.
//!
//! A [`ByteSource`] is one file or object seen both as random-access ranges
//! (Parquet footers and column chunks) and as a sequential reader (delimited
//! text). Adapters never know where the bytes come from.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use colbench_common::error::{Error, Result};
use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, Length};

const LOCAL_READ_BUFFER: usize = 256 * 1024;

pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Human-readable location, used in error messages.
    fn describe(&self) -> String;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_range(&self, range: Range<u64>) -> Result<Bytes>;

    /// Sequential reader from `start` to the end of the source.
    fn reader(&self, start: u64) -> Result<Box<dyn Read + Send>>;
}

/// A file on the local filesystem. Every read opens a fresh handle.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    len: u64,
}

impl LocalFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::DatasetNotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        if !meta.is_file() {
            return Err(Error::DatasetNotFound(format!("{} is not a file", path.display())));
        }
        Ok(Self { path, len: meta.len() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_at(&self, start: u64) -> Result<File> {
        let mut file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::DatasetNotFound(self.path.display().to_string()),
            _ => Error::Io(e),
        })?;
        file.seek(SeekFrom::Start(start))?;
        Ok(file)
    }
}

impl ByteSource for LocalFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        let length = range.end.saturating_sub(range.start) as usize;
        let mut buf = vec![0u8; length];
        self.open_at(range.start)?.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn reader(&self, start: u64) -> Result<Box<dyn Read + Send>> {
        let file = self.open_at(start)?;
        Ok(Box::new(BufReader::with_capacity(LOCAL_READ_BUFFER, file)))
    }
}

/// Adapts a [`ByteSource`] to parquet's [`ChunkReader`].
///
/// Parquet flattens reader errors into strings, so transport failures are
/// latched here and recovered by [`SourceReader::take_fault`] after decoding
/// fails.
#[derive(Debug, Clone)]
pub struct SourceReader {
    source: Arc<dyn ByteSource>,
    fault: Arc<Mutex<Option<String>>>,
}

impl SourceReader {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self { source, fault: Arc::new(Mutex::new(None)) }
    }

    /// Returns the latched transport failure, if any, as an error.
    pub fn take_fault(&self) -> Option<Error> {
        self.fault.lock().ok().and_then(|mut slot| slot.take()).map(Error::TransportError)
    }

    fn latch(&self, err: &Error) {
        if let Error::TransportError(msg) = err {
            if let Ok(mut slot) = self.fault.lock() {
                slot.get_or_insert_with(|| msg.clone());
            }
        }
    }

    /// Converts a decoder error, preferring a latched transport failure.
    pub fn decode_error(&self, err: impl fmt::Display) -> Error {
        self.take_fault().unwrap_or_else(|| {
            Error::DecodeError(format!("{}: {}", self.source.describe(), err))
        })
    }
}

impl Length for SourceReader {
    fn len(&self) -> u64 {
        self.source.len()
    }
}

impl ChunkReader for SourceReader {
    type T = LatchingReader;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        match self.source.reader(start) {
            Ok(inner) => Ok(LatchingReader { inner, owner: self.clone() }),
            Err(e) => {
                self.latch(&e);
                Err(ParquetError::External(Box::new(e)))
            }
        }
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        self.source.read_range(start..start + length as u64).map_err(|e| {
            self.latch(&e);
            ParquetError::External(Box::new(e))
        })
    }
}

/// Sequential reader handed to parquet that latches transport failures.
pub struct LatchingReader {
    inner: Box<dyn Read + Send>,
    owner: SourceReader,
}

impl Read for LatchingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            let err = Error::from_reader(e);
            self.owner.latch(&err);
            err.into_io()
        })
    }
}

use thiserror::Error;

/// Unified error type for colbench data access.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Unwraps an I/O error raised by a reader that smuggled a colbench error
    /// through `std::io::Read`. Anything else is reported as a decode failure.
    pub fn from_reader(err: std::io::Error) -> Self {
        let is_wrapped = err.get_ref().map(|inner| inner.is::<Error>()).unwrap_or(false);
        if is_wrapped {
            if let Some(inner) = err.into_inner() {
                if let Ok(wrapped) = inner.downcast::<Error>() {
                    return *wrapped;
                }
            }
            return Error::Internal("lost wrapped reader error".to_string());
        }
        Error::DecodeError(err.to_string())
    }

    /// Wraps this error so it can travel through `std::io::Read`.
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// True for errors that end an iteration without a dataset-level cause.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportError(_))
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::DecodeError(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigurationError(err.to_string())
    }
}

use thiserror::Error;

use crate::summary::OperationSummary;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Nested measurement scope: `{0}` started while another scope is active")]
    NestedScope(String),
    /// The measured operation failed. `profile` is the resource profile
    /// captured up to the failure, appended to the store unless its sink
    /// failed.
    #[error("Operation failed: {source}")]
    OperationFailed {
        source: colbench_common::Error,
        profile: Box<OperationSummary>,
    },
    #[error(transparent)]
    Common(#[from] colbench_common::Error),
    #[error("Metrics sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metrics record error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The partial resource profile of a failed operation.
    pub fn profile(&self) -> Option<&OperationSummary> {
        match self {
            Error::OperationFailed { profile, .. } => Some(profile),
            _ => None,
        }
    }
}

//! The seam between the fetcher and the network.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use colbench_common::Error;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;

/// A failed transport call, classified for retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// Worth retrying: resets, timeouts, throttling.
    Transient(String),
    NotFound(String),
    /// Retrying cannot help: credentials, malformed requests.
    Fatal(String),
}

impl TransportFault {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportFault::Transient(_))
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::Transient(msg) => write!(f, "transient: {msg}"),
            TransportFault::NotFound(msg) => write!(f, "not found: {msg}"),
            TransportFault::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<TransportFault> for Error {
    fn from(fault: TransportFault) -> Self {
        match fault {
            TransportFault::NotFound(key) => Error::DatasetNotFound(key),
            TransportFault::Transient(msg) => Error::TransportError(format!("retries exhausted: {msg}")),
            TransportFault::Fatal(msg) => Error::TransportError(msg),
        }
    }
}

/// Minimal object access needed to stream a dataset.
#[async_trait]
pub trait ObjectTransport: Send + Sync + fmt::Debug {
    /// Object size in bytes.
    async fn size(&self, key: &str) -> Result<u64, TransportFault>;

    /// Bytes of `range`, which must lie within the object.
    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, TransportFault>;

    /// Keys under `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, TransportFault>;
}

/// [`ObjectTransport`] over any `object_store` backend.
#[derive(Debug, Clone)]
pub struct StoreTransport {
    store: Arc<dyn ObjectStore>,
}

impl StoreTransport {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// HTTP status of a request the server rejected, read off the error chain.
fn client_status(err: &(dyn std::error::Error + 'static)) -> Option<u16> {
    let mut current = Some(err);
    while let Some(e) = current {
        let text = e.to_string();
        if let Some(rest) = text.split("Client error with status ").nth(1) {
            if let Some(status) = rest.get(..3).and_then(|code| code.parse().ok()) {
                return Some(status);
            }
        }
        current = e.source();
    }
    None
}

fn classify(err: object_store::Error) -> TransportFault {
    match err {
        object_store::Error::NotFound { path, .. } => TransportFault::NotFound(path),
        object_store::Error::Generic { store, source } => match client_status(source.as_ref()) {
            // 408 and 429 are the only client errors a retry can fix.
            Some(status) if (400..500).contains(&status) && status != 408 && status != 429 => {
                TransportFault::Fatal(format!("{store}: {source}"))
            }
            _ => TransportFault::Transient(format!("{store}: {source}")),
        },
        other => TransportFault::Fatal(other.to_string()),
    }
}

#[async_trait]
impl ObjectTransport for StoreTransport {
    async fn size(&self, key: &str) -> Result<u64, TransportFault> {
        let meta = self.store.head(&Path::from(key)).await.map_err(classify)?;
        Ok(meta.size as u64)
    }

    async fn fetch(&self, key: &str, range: Range<u64>) -> Result<Bytes, TransportFault> {
        let range = range.start as usize..range.end as usize;
        self.store.get_range(&Path::from(key), range).await.map_err(classify)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, TransportFault> {
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
        self.store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn store_transport_reads_ranges_and_lists() {
        let store = Arc::new(InMemory::new());
        store.put(&Path::from("tpch/nation.tbl"), Bytes::from_static(b"0|ALGERIA|\n")).await.unwrap();
        store.put(&Path::from("other/region.tbl"), Bytes::from_static(b"0|AFRICA|\n")).await.unwrap();
        let transport = StoreTransport::new(store);

        assert_eq!(transport.size("tpch/nation.tbl").await.unwrap(), 11);
        assert_eq!(transport.fetch("tpch/nation.tbl", 2..9).await.unwrap(), Bytes::from_static(b"ALGERIA"));
        assert_eq!(transport.list("tpch").await.unwrap(), vec!["tpch/nation.tbl".to_string()]);
    }

    fn generic(message: &str) -> object_store::Error {
        object_store::Error::Generic { store: "S3", source: Box::new(std::io::Error::other(message.to_string())) }
    }

    #[test]
    fn rejected_requests_fail_fast() {
        let denied = classify(generic("Client error with status 403 Forbidden: AccessDenied"));
        assert!(matches!(denied, TransportFault::Fatal(_)));
        let bad_request = classify(generic("Client error with status 400 Bad Request: InvalidArgument"));
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn throttling_and_network_errors_are_transient() {
        assert!(classify(generic("Client error with status 429 Too Many Requests: SlowDown")).is_transient());
        assert!(classify(generic("Client error with status 408 Request Timeout")).is_transient());
        assert!(classify(generic("Error after 0 retries: connection reset by peer")).is_transient());
        assert!(classify(generic("Server error with status 503 Service Unavailable")).is_transient());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let transport = StoreTransport::new(Arc::new(InMemory::new()));
        let fault = transport.size("tpch/orders.parquet").await.unwrap_err();
        assert!(matches!(fault, TransportFault::NotFound(_)));
        assert!(matches!(Error::from(fault), Error::DatasetNotFound(_)));
    }
}

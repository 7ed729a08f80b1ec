//! Remote objects as [`ByteSource`]s.

use std::fmt;
use std::io::Read;
use std::ops::Range;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use colbench_common::error::{Error, Result};
use colbench_connector_filesystem::ByteSource;
use tokio::runtime::Handle;
use tracing::debug;

use crate::retry::{with_retry, RetryPolicy};
use crate::transport::ObjectTransport;

/// One object in the bucket, read window by window.
///
/// Reads block the calling thread on the runtime that created the object, so
/// they must run on a blocking worker, never on an async task.
#[derive(Clone)]
pub struct RemoteObject {
    transport: Arc<dyn ObjectTransport>,
    key: String,
    len: u64,
    window_bytes: usize,
    retry: RetryPolicy,
    runtime: Handle,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("key", &self.key)
            .field("len", &self.len)
            .field("window_bytes", &self.window_bytes)
            .finish()
    }
}

impl RemoteObject {
    pub(crate) fn new(
        transport: Arc<dyn ObjectTransport>,
        key: impl Into<String>,
        len: u64,
        window_bytes: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("remote object needs a tokio runtime: {e}")))?;
        Ok(Self { transport, key: key.into(), len, window_bytes: window_bytes.max(1), retry, runtime })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetches one range, retrying transient faults on the same range.
    fn fetch(&self, range: Range<u64>) -> Result<Bytes> {
        let transport = &self.transport;
        let key = self.key.as_str();
        let bytes = self.runtime.block_on(with_retry(&self.retry, key, move || {
            transport.fetch(key, range.clone())
        }))?;
        Ok(bytes)
    }
}

impl ByteSource for RemoteObject {
    fn describe(&self) -> String {
        format!("object://{}", self.key)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if range.end > self.len || range.start > range.end {
            return Err(Error::DecodeError(format!(
                "{}: range {}..{} outside object of {} bytes",
                self.describe(),
                range.start,
                range.end,
                self.len
            )));
        }
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        self.fetch(range)
    }

    fn reader(&self, start: u64) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(WindowedReader { object: self.clone(), next: start.min(self.len), window: Bytes::new() }))
    }
}

/// Sequential reader holding at most one window in memory.
struct WindowedReader {
    object: RemoteObject,
    next: u64,
    window: Bytes,
}

impl Read for WindowedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.window.has_remaining() {
            if self.next >= self.object.len || buf.is_empty() {
                return Ok(0);
            }
            let end = (self.next + self.object.window_bytes as u64).min(self.object.len);
            debug!(key = %self.object.key, start = self.next, end, "fetching window");
            self.window = self.object.fetch(self.next..end).map_err(Error::into_io)?;
            self.next = end;
        }
        let n = buf.len().min(self.window.remaining());
        self.window.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StoreTransport;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::ObjectStore;

    async fn object(body: &'static [u8], window: usize) -> RemoteObject {
        let store = Arc::new(InMemory::new());
        store.put(&Path::from("t/digits.txt"), Bytes::from_static(body)).await.unwrap();
        RemoteObject::new(
            Arc::new(StoreTransport::new(store)),
            "t/digits.txt",
            body.len() as u64,
            window,
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn windowed_reader_yields_whole_object() {
        let object = object(b"0123456789abcdefghij", 3).await;
        let text = tokio::task::spawn_blocking(move || {
            let mut out = String::new();
            object.reader(4).unwrap().read_to_string(&mut out).unwrap();
            out
        })
        .await
        .unwrap();
        assert_eq!(text, "456789abcdefghij");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ranges_outside_the_object_are_rejected() {
        let object = object(b"0123456789", 4).await;
        let (inside, outside) = tokio::task::spawn_blocking(move || {
            (object.read_range(2..6).unwrap(), object.read_range(8..12).unwrap_err())
        })
        .await
        .unwrap();
        assert_eq!(inside, Bytes::from_static(b"2345"));
        assert!(matches!(outside, Error::DecodeError(_)));
    }
}

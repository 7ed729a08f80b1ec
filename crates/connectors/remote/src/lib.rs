//! Remote connector
//!
//! Streams datasets out of an S3-compatible bucket through the same format
//! adapters the filesystem connector uses. Objects are never downloaded
//! whole: sequential reads pull one window at a time and every window fetch
//! is retried on its own.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use colbench_common::error::{Error, Result};
use colbench_common::{BatchSource, BatchStream, Dataset, Format, Location, RemoteSettings, DEFAULT_CHUNK_SIZE};
use colbench_connector_filesystem::format::{adapter_for, AdapterOptions};
use colbench_connector_filesystem::stream;
use object_store::aws::AmazonS3Builder;
use object_store::RetryConfig;
use tracing::{debug, info};

pub mod object;
pub mod retry;
pub mod transport;

pub use object::RemoteObject;
pub use retry::{with_retry, RetryPolicy};
pub use transport::{ObjectTransport, StoreTransport, TransportFault};

/// Default size of one sequential read window.
pub const DEFAULT_WINDOW_BYTES: usize = 8 * 1024 * 1024;

/// Streaming knobs independent of where the bucket lives.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub window_bytes: usize,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub adapter: AdapterOptions,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            window_bytes: DEFAULT_WINDOW_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            adapter: AdapterOptions::default(),
        }
    }
}

impl FetchOptions {
    /// Window and retry settings taken from the remote section of the config.
    pub fn from_settings(settings: &RemoteSettings) -> Self {
        Self {
            window_bytes: settings.window_bytes,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::ConfigurationError(format!("remote.{field} must be set")));
    }
    Ok(())
}

fn validate(settings: &RemoteSettings) -> Result<()> {
    require("endpoint", &settings.endpoint)?;
    require("access_key", &settings.access_key)?;
    require("secret_key", &settings.secret_key)?;
    require("bucket", &settings.bucket)?;
    if !(settings.endpoint.starts_with("http://") || settings.endpoint.starts_with("https://")) {
        return Err(Error::ConfigurationError(format!(
            "remote.endpoint `{}` must start with http:// or https://",
            settings.endpoint
        )));
    }
    if settings.window_bytes == 0 {
        return Err(Error::ConfigurationError("remote.window_bytes must be positive".to_string()));
    }
    Ok(())
}

/// A [`BatchSource`] over objects in one bucket.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn ObjectTransport>,
    options: FetchOptions,
    declared: HashMap<String, SchemaRef>,
}

impl RemoteFetcher {
    /// Connects to the bucket described by `settings`.
    ///
    /// Settings are checked and the client is built without touching the
    /// network; bad settings fail with `ConfigurationError`.
    pub fn new(settings: &RemoteSettings, options: FetchOptions) -> Result<Self> {
        validate(settings)?;
        let store = AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_allow_http(settings.endpoint.starts_with("http://"))
            .with_retry(store_retry_config())
            .build()
            .map_err(|e| Error::ConfigurationError(format!("object store client: {e}")))?;
        info!(endpoint = %settings.endpoint, bucket = %settings.bucket, "remote fetcher ready");
        Ok(Self::with_transport(Arc::new(StoreTransport::new(Arc::new(store))), options))
    }

    /// Uses `transport` directly, e.g. an in-memory or local store.
    pub fn with_transport(transport: Arc<dyn ObjectTransport>, options: FetchOptions) -> Self {
        Self { transport, options, declared: HashMap::new() }
    }

    /// Declares column names and types for a delimited object, keyed by file
    /// stem.
    pub fn with_declared_schema(mut self, table: impl Into<String>, schema: SchemaRef) -> Self {
        self.declared.insert(table.into(), schema);
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Resolves and streams `key` with the configured chunk size.
    pub async fn read_batches(
        &self,
        key: &str,
        format: Option<Format>,
        columns: Option<&[String]>,
    ) -> Result<BatchStream> {
        let dataset = self.resolve(key, format).await?;
        self.open(&dataset, columns, self.options.chunk_size).await
    }

    /// Keys under `prefix` ending with `suffix`, sorted.
    pub async fn list_objects(&self, prefix: &str, suffix: &str) -> Result<Vec<String>> {
        let transport = &self.transport;
        let mut keys = with_retry(&self.options.retry, prefix, move || transport.list(prefix)).await?;
        keys.retain(|key| key.ends_with(suffix));
        keys.sort();
        debug!(prefix, suffix, found = keys.len(), "listed remote objects");
        Ok(keys)
    }

    async fn object(&self, key: &str) -> Result<RemoteObject> {
        let transport = &self.transport;
        let len = with_retry(&self.options.retry, key, move || transport.size(key)).await?;
        RemoteObject::new(self.transport.clone(), key, len, self.options.window_bytes, self.options.retry)
    }
}

/// The S3 client makes exactly one attempt per call; [`RetryPolicy`] is the
/// only retry layer.
fn store_retry_config() -> RetryConfig {
    RetryConfig { max_retries: 0, ..RetryConfig::default() }
}

fn object_stem(key: &str) -> String {
    Path::new(key)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string())
}

#[async_trait]
impl BatchSource for RemoteFetcher {
    async fn resolve(&self, key: &str, format: Option<Format>) -> Result<Dataset> {
        let format = match format {
            Some(format) => format,
            None => Format::from_path(key)?,
        };
        let object = self.object(key).await?;
        let name = object_stem(key);
        let adapter = adapter_for(format, self.options.adapter);

        let declared = match format {
            Format::Parquet => None,
            Format::Csv | Format::Tbl => self.declared.get(&name).cloned(),
        };
        let (schema, rows) = match declared {
            Some(schema) => (schema, None),
            None => tokio::task::spawn_blocking(move || adapter.schema(Arc::new(object)))
                .await
                .map_err(|e| Error::Internal(format!("schema task failed: {e}")))??,
        };

        info!(key, format = %format, columns = schema.fields().len(), rows = ?rows, "resolved remote dataset");
        Ok(Dataset::new(name, Location::Object(key.to_string()), format, schema, rows))
    }

    async fn open(
        &self,
        dataset: &Dataset,
        columns: Option<&[String]>,
        chunk_size: usize,
    ) -> Result<BatchStream> {
        let Location::Object(key) = dataset.location() else {
            return Err(Error::ConfigurationError(format!(
                "dataset `{}` at {} is not a remote object",
                dataset.name(),
                dataset.location()
            )));
        };
        let object = self.object(key).await?;
        debug!(key = %key, chunk_size, window_bytes = self.options.window_bytes, "opening remote batch stream");
        let adapter = adapter_for(dataset.format(), self.options.adapter);
        stream::open_with_adapter(adapter, Arc::new(object), dataset, columns, chunk_size).await
    }
}

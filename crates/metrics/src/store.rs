//! Append-only log of measured operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colbench_common::Variant;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::summary::MetricRecord;

/// Thread-safe, append-only metrics log.
///
/// Clones share the same log. When a sink file is configured every record is
/// also appended to it as one JSON line, in the same order as in memory.
#[derive(Debug, Clone, Default)]
pub struct MetricsStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: RwLock<Vec<MetricRecord>>,
    sink: Option<PathBuf>,
}

/// Row and column runs of one operation on one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub operation: String,
    pub dataset: String,
    pub row: MetricRecord,
    pub column: MetricRecord,
}

impl Comparison {
    /// Row duration over column duration; `None` when the column run took no
    /// measurable time.
    pub fn speedup(&self) -> Option<f64> {
        (self.column.duration_seconds > 0.0).then(|| self.row.duration_seconds / self.column.duration_seconds)
    }
}

impl MetricsStore {
    /// An in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store mirrored to `path`, creating parent directories as needed.
    /// Existing lines in the file are kept but not loaded.
    pub async fn with_sink(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self { inner: Arc::new(StoreInner { records: RwLock::new(Vec::new()), sink: Some(path) }) })
    }

    /// Replays a JSON-lines file into a new in-memory store, in file order.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        let records = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<MetricRecord>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(path = %path.as_ref().display(), records = records.len(), "loaded metrics log");
        Ok(Self { inner: Arc::new(StoreInner { records: RwLock::new(records), sink: None }) })
    }

    pub fn sink(&self) -> Option<&Path> {
        self.inner.sink.as_deref()
    }

    /// Appends one record. The sink is written before the in-memory log, so
    /// a failed write leaves both unchanged.
    pub async fn append(&self, record: MetricRecord) -> Result<()> {
        let mut records = self.inner.records.write().await;
        if let Some(path) = &self.inner.sink {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(&line).await?;
            file.flush().await?;
        }
        records.push(record);
        Ok(())
    }

    /// Every record, in append order.
    pub async fn records(&self) -> Vec<MetricRecord> {
        self.inner.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Records grouped by operation name. Groups are ordered by first
    /// appearance and keep append order inside.
    pub async fn by_operation(&self) -> Vec<(String, Vec<MetricRecord>)> {
        let records = self.inner.records.read().await;
        let mut groups: Vec<(String, Vec<MetricRecord>)> = Vec::new();
        for record in records.iter() {
            match groups.iter_mut().find(|(name, _)| *name == record.operation) {
                Some((_, group)) => group.push(record.clone()),
                None => groups.push((record.operation.clone(), vec![record.clone()])),
            }
        }
        groups
    }

    /// Pairs the latest successful row and column run of every
    /// (operation, dataset) that has both.
    pub async fn comparisons(&self) -> Vec<Comparison> {
        let mut out = Vec::new();
        for (operation, group) in self.by_operation().await {
            let mut datasets: Vec<&str> = Vec::new();
            for record in &group {
                if !datasets.contains(&record.dataset.as_str()) {
                    datasets.push(&record.dataset);
                }
            }
            for dataset in datasets {
                let latest = |variant: Variant| {
                    group.iter().rev().find(|r| r.success && r.dataset == dataset && r.variant == variant).cloned()
                };
                if let (Some(row), Some(column)) = (latest(Variant::Row), latest(Variant::Column)) {
                    out.push(Comparison { operation: operation.clone(), dataset: dataset.to_string(), row, column });
                }
            }
        }
        out
    }
}

//! Scoped measurement of one operation at a time.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::sampler::{ProcessProbe, ResourceProbe, ResourceSampler, DEFAULT_SAMPLE_INTERVAL};
use crate::store::MetricsStore;
use crate::summary::{OperationLabel, OperationSummary};

/// What a measured operation returns: its value and the rows it processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub rows: u64,
}

impl<T> Outcome<T> {
    pub fn new(value: T, rows: u64) -> Self {
        Self { value, rows }
    }
}

/// A successful operation's value together with its resource profile.
#[derive(Debug, Clone)]
pub struct Measured<T> {
    pub value: T,
    pub summary: OperationSummary,
    /// False when the summary could not be written to the store's sink.
    pub recorded: bool,
}

type ProbeFactory = Arc<dyn Fn() -> Box<dyn ResourceProbe> + Send + Sync>;

/// Runs operations inside a measurement scope and logs their summaries.
///
/// Scopes never nest: while one `measure` call is in flight on a recorder,
/// any other is refused with [`Error::NestedScope`].
#[derive(Clone)]
pub struct OperationRecorder {
    store: MetricsStore,
    interval: Duration,
    probe: ProbeFactory,
    active: Arc<AtomicBool>,
}

/// Clears the active flag however the scope ends.
struct ScopeGuard {
    active: Arc<AtomicBool>,
}

impl ScopeGuard {
    fn acquire(active: &Arc<AtomicBool>, label: &OperationLabel) -> Result<Self> {
        if active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!(label = %label, "refusing nested measurement scope");
            return Err(Error::NestedScope(label.to_string()));
        }
        Ok(Self { active: active.clone() })
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

impl OperationRecorder {
    /// Measures the current process at the default interval.
    pub fn new(store: MetricsStore) -> Self {
        Self::with_interval(store, DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(store: MetricsStore, interval: Duration) -> Self {
        Self::with_probe_factory(store, interval, || Box::new(ProcessProbe::new()) as Box<dyn ResourceProbe>)
    }

    /// Uses `factory` to build a fresh probe for every scope.
    pub fn with_probe_factory<F>(store: MetricsStore, interval: Duration, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ResourceProbe> + Send + Sync + 'static,
    {
        Self { store, interval, probe: Arc::new(factory), active: Arc::new(AtomicBool::new(false)) }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Runs `op` inside a measurement scope.
    ///
    /// The sampler is stopped and exactly one summary is appended whether `op`
    /// succeeds or fails. A failure is returned as
    /// [`Error::OperationFailed`] carrying the profile up to that point, with
    /// zero rows and `success = false`. If this future is dropped or `op`
    /// panics, the scope is released and the sampler stopped, but nothing is
    /// appended.
    ///
    /// A store that cannot take the summary never replaces the operation's
    /// own result: the append error is logged, a failure is still returned as
    /// `OperationFailed`, and a success comes back with `recorded = false`.
    pub async fn measure<T, F, Fut>(&self, label: OperationLabel, op: F) -> Result<Measured<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = colbench_common::Result<Outcome<T>>>,
    {
        let scope = ScopeGuard::acquire(&self.active, &label)?;
        let recorded_at = Utc::now();
        let started = Instant::now();
        let sampler = ResourceSampler::with_boxed_probe(self.interval, (self.probe)()).start();

        let result = op().await;

        let samples = sampler.stop().await;
        let duration = started.elapsed();
        drop(scope);

        let (rows, success) = match &result {
            Ok(outcome) => (outcome.rows, true),
            Err(_) => (0, false),
        };
        let summary = OperationSummary::reduce(label, recorded_at, duration, &samples, rows, success);
        let recorded = match self.store.append(summary.to_record()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(label = %summary.label, error = %e, "could not record operation summary");
                false
            }
        };

        info!(
            label = %summary.label,
            success,
            rows,
            duration_ms = duration.as_millis() as u64,
            max_cpu = summary.max_cpu,
            max_memory_bytes = summary.max_memory_bytes,
            samples = summary.samples,
            recorded,
            "operation measured"
        );

        match result {
            Ok(outcome) => Ok(Measured { value: outcome.value, summary, recorded }),
            Err(source) => Err(Error::OperationFailed { source, profile: Box::new(summary) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ProbeReading;
    use colbench_common::Variant;
    use std::sync::atomic::AtomicU64;

    struct FixedProbe;

    impl ResourceProbe for FixedProbe {
        fn read(&mut self) -> Option<ProbeReading> {
            Some(ProbeReading { cpu_percent: 25.0, memory_bytes: 2 * 1024 * 1024, ..Default::default() })
        }
    }

    fn recorder(store: MetricsStore) -> OperationRecorder {
        OperationRecorder::with_probe_factory(store, Duration::from_millis(100), || Box::new(FixedProbe) as Box<dyn ResourceProbe>)
    }

    fn label(operation: &str) -> OperationLabel {
        OperationLabel::new(operation, "lineitem", Variant::Column)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_scope_appends_one_summary() {
        let store = MetricsStore::new();
        let recorder = recorder(store.clone());

        let measured = recorder
            .measure(label("scan"), || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Outcome::new("done", 6_000))
            })
            .await
            .unwrap();

        assert_eq!(measured.value, "done");
        assert_eq!(measured.summary.rows_processed, 6_000);
        assert!((6..=7).contains(&measured.summary.samples), "{}", measured.summary.samples);
        assert!(measured.recorded);
        assert_eq!(measured.summary.max_cpu, 25.0);

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].max_memory_mb, 2.0);
        assert!(records[0].duration_seconds >= 0.5);
    }

    /// Reports a disk counter the test can bump.
    struct DiskProbe(Arc<AtomicU64>);

    impl ResourceProbe for DiskProbe {
        fn read(&mut self) -> Option<ProbeReading> {
            Some(ProbeReading { disk_read_bytes: self.0.load(Ordering::SeqCst), ..Default::default() })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn io_at_scope_start_is_counted() {
        let disk = Arc::new(AtomicU64::new(0));
        let counter = disk.clone();
        let recorder = OperationRecorder::with_probe_factory(MetricsStore::new(), Duration::from_millis(100), move || {
            Box::new(DiskProbe(counter.clone())) as Box<dyn ResourceProbe>
        });

        let measured = recorder
            .measure(label("scan"), || async {
                disk.fetch_add(5_000_000, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(Outcome::new((), 1))
            })
            .await
            .unwrap();

        assert_eq!(measured.summary.disk_read_bytes, 5_000_000);
    }

    async fn unwritable_store(dir: &std::path::Path) -> MetricsStore {
        // The sink path is a directory, so every append fails.
        let sink = dir.join("metrics.jsonl");
        std::fs::create_dir(&sink).unwrap();
        MetricsStore::with_sink(sink).await.unwrap()
    }

    #[tokio::test]
    async fn sink_failure_keeps_the_operation_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(unwritable_store(dir.path()).await);

        let err = recorder
            .measure(label("scan"), || async {
                Err::<Outcome<()>, _>(colbench_common::Error::DecodeError("corrupt row 7".into()))
            })
            .await
            .unwrap_err();

        match err {
            Error::OperationFailed { source, profile } => {
                assert!(matches!(source, colbench_common::Error::DecodeError(_)));
                assert!(!profile.success);
            }
            other => panic!("expected OperationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sink_failure_keeps_the_operation_value() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(unwritable_store(dir.path()).await);

        let measured = recorder.measure(label("scan"), || async { Ok(Outcome::new(42, 9)) }).await.unwrap();

        assert_eq!(measured.value, 42);
        assert_eq!(measured.summary.rows_processed, 9);
        assert!(!measured.recorded);
        assert!(recorder.store().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn nested_scope_is_refused() {
        let recorder = recorder(MetricsStore::new());

        let outer = recorder
            .measure(label("outer"), || async {
                let inner = recorder.measure(label("inner"), || async { Ok(Outcome::new((), 0)) }).await;
                assert!(matches!(inner, Err(Error::NestedScope(_))));
                Ok(Outcome::new((), 1))
            })
            .await;

        assert!(outer.is_ok());
        assert_eq!(recorder.store().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_is_released_after_failure_and_drop() {
        let recorder = recorder(MetricsStore::new());

        let failed = recorder
            .measure(label("scan"), || async { Err::<Outcome<()>, _>(colbench_common::Error::Internal("boom".into())) })
            .await;
        assert!(failed.is_err());

        let abandoned = recorder.measure(label("scan"), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Outcome::new((), 0))
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(150), abandoned).await;
        assert!(timed_out.is_err());

        let again = recorder.measure(label("scan"), || async { Ok(Outcome::new((), 3)) }).await;
        assert!(again.is_ok());
        assert_eq!(recorder.store().len().await, 2);
    }
}

//! Background resource sampling.
//!
//! A [`ResourceSampler`] is idle until [`ResourceSampler::start`] moves it
//! into a [`RunningSampler`]; [`RunningSampler::stop`] consumes that and
//! hands back every sample taken. The sample vector is owned by the sampling
//! task alone until the task has finished.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// One raw reading of the measured process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReading {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

/// Source of process readings. Called from the sampling task only.
pub trait ResourceProbe: Send + 'static {
    /// `None` when the process could not be read.
    fn read(&mut self) -> Option<ProbeReading>;
}

/// Reads the current process through `sysinfo`.
pub struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "cannot determine current pid, readings will be zero");
                None
            }
        };
        Self { system: System::new(), pid }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcessProbe {
    fn read(&mut self) -> Option<ProbeReading> {
        let pid = self.pid?;
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory().with_disk_usage();
        if !self.system.refresh_process_specifics(pid, refresh) {
            return None;
        }
        let process = self.system.process(pid)?;
        let disk = process.disk_usage();
        Some(ProbeReading {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            disk_read_bytes: disk.total_read_bytes,
            disk_write_bytes: disk.total_written_bytes,
        })
    }
}

/// One timestamped snapshot taken by a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Time since the sampler started.
    pub elapsed: Duration,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Cumulative since process start, never decreasing within one sampler.
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

/// An idle sampler.
pub struct ResourceSampler {
    interval: Duration,
    probe: Box<dyn ResourceProbe>,
}

impl ResourceSampler {
    /// Samples the current process every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self::with_probe(interval, ProcessProbe::new())
    }

    pub fn with_probe(interval: Duration, probe: impl ResourceProbe) -> Self {
        Self::with_boxed_probe(interval, Box::new(probe))
    }

    pub fn with_boxed_probe(interval: Duration, probe: Box<dyn ResourceProbe>) -> Self {
        Self { interval, probe }
    }

    /// Takes a baseline sample right away, then spawns the sampling task.
    /// Must be called inside a tokio runtime.
    ///
    /// The baseline is read before `start` returns, so anything the caller
    /// does afterwards lands in later samples. Ticks that fall behind are
    /// delayed rather than bunched up.
    pub fn start(mut self) -> RunningSampler {
        let (stop_tx, stop_rx) = oneshot::channel();
        let started = Instant::now();
        let mut counters = Counters { read: 0, write: 0 };
        let baseline = take_sample(self.probe.as_mut(), started, &mut counters);
        let task = tokio::spawn(sample_loop(self.interval, self.probe, started, counters, baseline, stop_rx));
        debug!(interval_ms = self.interval.as_millis() as u64, "resource sampler started");
        RunningSampler { stop: Some(stop_tx), task: Some(task), started }
    }
}

struct Counters {
    read: u64,
    write: u64,
}

fn take_sample(probe: &mut dyn ResourceProbe, started: Instant, counters: &mut Counters) -> ResourceSample {
    let reading = probe.read().unwrap_or_else(|| {
        debug!("resource probe failed, recording a zero reading");
        ProbeReading::default()
    });
    counters.read = counters.read.max(reading.disk_read_bytes);
    counters.write = counters.write.max(reading.disk_write_bytes);
    ResourceSample {
        elapsed: started.elapsed(),
        cpu_percent: reading.cpu_percent,
        memory_bytes: reading.memory_bytes,
        disk_read_bytes: counters.read,
        disk_write_bytes: counters.write,
    }
}

async fn sample_loop(
    period: Duration,
    mut probe: Box<dyn ResourceProbe>,
    started: Instant,
    mut counters: Counters,
    baseline: ResourceSample,
    mut stop: oneshot::Receiver<()>,
) -> Vec<ResourceSample> {
    let mut ticker = interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut samples = vec![baseline];

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => samples.push(take_sample(probe.as_mut(), started, &mut counters)),
        }
    }
    samples.push(take_sample(probe.as_mut(), started, &mut counters));
    samples
}

/// A sampler whose task is running.
///
/// Dropping it without calling [`stop`](Self::stop) still signals the task,
/// which then takes its final sample and exits on its own.
pub struct RunningSampler {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Vec<ResourceSample>>>,
    started: Instant,
}

impl RunningSampler {
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Signals the task and waits until it has taken its final sample.
    pub async fn stop(mut self) -> Vec<ResourceSample> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(task) = self.task.take() else {
            return Vec::new();
        };
        match task.await {
            Ok(samples) => {
                debug!(samples = samples.len(), "resource sampler stopped");
                samples
            }
            Err(e) => {
                warn!(error = %e, "resource sampler task failed");
                Vec::new()
            }
        }
    }
}

impl Drop for RunningSampler {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

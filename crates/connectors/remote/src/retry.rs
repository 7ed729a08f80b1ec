use std::future::Future;
use std::time::Duration;

use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::warn;

use crate::transport::TransportFault;

/// Exponential backoff applied to transient transport faults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay schedule without jitter. The retry count, not elapsed time, ends
    /// the schedule.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_backoff)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Runs `op` until it succeeds, fails with a non-transient fault, or the
/// policy runs out of retries. The last fault is returned as is.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, TransportFault>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportFault>>,
{
    let max_retries = policy.max_retries;
    let mut attempt = 0u32;
    let mut retry = 0u32;

    let attempt_once = || {
        attempt += 1;
        let may_retry = attempt <= max_retries;
        let call = op();
        async move {
            call.await.map_err(|fault| {
                if fault.is_transient() && may_retry {
                    backoff::Error::transient(fault)
                } else {
                    backoff::Error::permanent(fault)
                }
            })
        }
    };
    let notify = |fault: TransportFault, delay: Duration| {
        retry += 1;
        warn!(
            op = what,
            attempt = retry,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %fault,
            "transient transport fault, retrying"
        );
    };

    retry_notify(policy.schedule(), attempt_once, notify).await
}

//! Gateway - Contract for clients of remote infrastructure APIs
//!
//! Providers reach the remote API through a gateway exposing create /
//! describe / destroy primitives plus a blocking convergence wait. Timeout and
//! transient-error handling live here so a provider sees the wait as one call
//! with three outcomes.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Errors reported by a gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The referenced remote object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Throttling, dispatch or timeout failure that may succeed when retried
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote API rejected the call
    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl GatewayError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Shortest delay between two probes; a zero interval is raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for convergence and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    #[serde(with = "secs")]
    pub timeout: Duration,
    #[serde(with = "secs")]
    pub interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Delay between probes, never below `MIN_POLL_INTERVAL`
    pub fn poll_interval(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }

    /// Point in time the wait gives up; `None` when the timeout is too large
    /// to represent, which makes the wait unbounded
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        start.checked_add(self.timeout)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(5),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Result of a single observation while waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// The target state has been reached
    Reached,
    /// Not there yet; keep polling
    Pending,
    /// The resource can no longer reach the target state
    Unreachable(String),
}

/// Outcome of a blocking convergence wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    Failed(GatewayError),
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready)
    }
}

/// Poll `probe` until it reports convergence, the policy deadline passes, or
/// a non-transient error occurs
///
/// Cancellation is by dropping the returned future; the only suspension
/// points are the probe itself and the interval sleep.
pub async fn poll_until<F, Fut>(policy: &WaitPolicy, mut probe: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<Convergence>>,
{
    let deadline = policy.deadline_from(Instant::now());
    let interval = policy.poll_interval();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match probe().await {
            Ok(Convergence::Reached) => return WaitOutcome::Ready,
            Ok(Convergence::Unreachable(reason)) => {
                return WaitOutcome::Failed(GatewayError::api("Unreachable", reason));
            }
            Ok(Convergence::Pending) => {
                log::debug!("attempt {}: target state not reached yet", attempt);
            }
            Err(err) if err.is_transient() => {
                log::debug!("attempt {}: transient error while waiting: {}", attempt, err);
            }
            Err(err) => return WaitOutcome::Failed(err),
        }

        let delay = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::time::sleep(delay).await;
    }
}

//! Reconnect supervisor.
//!
//! Repeats a session attempt after abnormal backend closures, with
//! exponential backoff and a status frame to the client before every wait.

use std::time::Duration;

use agent_bridge_protocol::ServerFrame;
use async_trait::async_trait;
use log::{error, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::session::ClientOutbox;

/// Strategy for retrying abnormal backend closures with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for later retries.
    pub max_delay: Duration,
    /// Symmetric jitter ratio (0.0..=1.0) applied to each delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1 for the first retry); doubles each
    /// time up to `max_delay`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Spread `delay` uniformly over `delay * (1 ± jitter_ratio)`.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        let ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if ratio == 0.0 {
            return delay;
        }
        let factor = 1.0 + ratio * (2.0 * rand::random::<f64>() - 1.0);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
    }

    /// Fresh state for one supervisor invocation.
    pub fn start(&self) -> RetryState {
        RetryState {
            attempt: 0,
            wait: Duration::ZERO,
        }
    }
}

/// Progress of one supervisor invocation; never shared across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts that have failed so far.
    pub attempt: u32,
    /// Most recent wait.
    pub wait: Duration,
}

impl RetryState {
    /// Record a failed attempt; the wait before the next one, or `None` when
    /// the attempt budget is spent.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= policy.max_attempts.max(1) {
            return None;
        }
        self.wait = policy.with_jitter(policy.backoff_delay(self.attempt));
        Some(self.wait)
    }
}

/// One repeatable unit of work under the supervisor.
#[async_trait]
pub trait RetryableRun: Send {
    async fn run_once(&mut self) -> BridgeResult<()>;
}

/// Run `run` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
pub async fn supervise<R>(policy: &RetryPolicy, client: &ClientOutbox, run: &mut R) -> BridgeResult<()>
where
    R: RetryableRun + ?Sized,
{
    let mut state = policy.start();
    loop {
        let err = match run.run_once().await {
            Err(err) if err.is_retryable() => err,
            other => return other,
        };

        let Some(delay) = state.next_delay(policy) else {
            error!(
                "Giving up on backend after {} attempts: {}",
                state.attempt, err
            );
            return Err(BridgeError::RetriesExhausted {
                attempts: state.attempt,
                last: Box::new(err),
            });
        };

        warn!(
            "Backend connection attempt {} failed ({}); retrying in {:?}",
            state.attempt, err, delay
        );
        client.send(ServerFrame::status(format!(
            "Model connection error, retrying in {:.1} seconds...",
            delay.as_secs_f64()
        )))?;
        tokio::time::sleep(delay).await;
    }
}

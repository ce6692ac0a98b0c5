//! Exponential-backoff harness wrapped around every remote call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Called before each sleep with the fault, the zero-based attempt number
/// and the chosen delay. A failing hook is logged and otherwise ignored.
pub type OnRetry<'a> = &'a (dyn Fn(&Error, u32, Duration) -> anyhow::Result<()> + Send + Sync);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first; the op runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to each backoff step.
    pub jitter: Duration,
    /// Substrings matched against the text of wrapped transport errors.
    /// Structured classification (status codes, timeouts) always runs first;
    /// these patterns never apply to integrity faults.
    pub retry_on: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: Duration::from_millis(100),
            retry_on: [
                "ETIMEDOUT",
                "ECONNRESET",
                "ECONNREFUSED",
                "EPIPE",
                "ENOTFOUND",
                "EAI_AGAIN",
                "socket hang up",
                "connection reset",
                "timed out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay for a zero-based attempt, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis((millis as u64).min(self.max_delay.as_millis() as u64))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.delay_for_attempt(attempt) + jitter
    }

    fn is_retryable(&self, err: &Error) -> bool {
        if err.is_retryable() {
            return true;
        }
        // a structured status already classified the fault as terminal
        if err.status().is_some() {
            return false;
        }
        // free-text fallback for errors wrapping transport detail; integrity
        // faults never reach this point with a matching pattern
        match err {
            Error::UploadFailed { reason, .. }
            | Error::ListFailed { reason, .. }
            | Error::DownloadFailed { reason, .. }
            | Error::Engine(reason)
            | Error::GatewayFallbackDisabled { reason } => {
                self.retry_on.iter().any(|p| reason.contains(p.as_str()))
            }
            _ => false,
        }
    }
}

/// Runs `op` until it succeeds, the fault is terminal, or the retry budget
/// is spent.
pub async fn retry<T, F, Fut>(cfg: &RetryConfig, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_hook(cfg, None, op).await
}

pub async fn retry_with_hook<T, F, Fut>(
    cfg: &RetryConfig,
    on_retry: Option<OnRetry<'_>>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= cfg.max_retries || !cfg.is_retryable(&err) {
                    return Err(err);
                }
                let delay = cfg.jittered_delay(attempt);
                if let Some(hook) = on_retry {
                    if let Err(hook_err) = hook(&err, attempt, delay) {
                        warn!("retry hook failed: {:?}", hook_err);
                    }
                }
                warn!(attempt, ?delay, "retrying after {}", err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

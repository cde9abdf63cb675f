use crate::core::config::RetryConfig;
use anyhow::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};

/// Non-success reply from the generative service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// True when `err` signals a rate limit or exhausted quota. Only the
/// innermost message is matched, so wrapping context cannot fake a 429.
pub fn is_capacity_error(err: &anyhow::Error) -> bool {
    if err
        .chain()
        .filter_map(|e| e.downcast_ref::<ApiError>())
        .any(|api| api.status == 429)
    {
        return true;
    }
    let text = err.root_cause().to_string();
    text.contains("429") || text.to_lowercase().contains("quota") || text.contains("RESOURCE_EXHAUSTED")
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: base, 2×base, 4×base, … one per retry.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        // 2^n scaled by base/2 gives base·2^(n-1).
        ExponentialBackoff::from_millis(2)
            .factor(base_ms)
            .map(|delay| delay / 2)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Runs `op`, retrying capacity errors on the backoff schedule until
    /// `max_attempts` calls have been made. Other errors return at once.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0u32;
        Retry::spawn(self.strategy(), || {
            attempt += 1;
            let call = op();
            async move {
                match call.await {
                    Ok(value) => Ok(value),
                    Err(err) if is_capacity_error(&err) => {
                        if attempt < max_attempts {
                            warn!(
                                "{}: rate limit hit, retrying ({} attempts left): {}",
                                label,
                                max_attempts - attempt,
                                err
                            );
                        }
                        Err(RetryError::Transient {
                            err,
                            retry_after: None,
                        })
                    }
                    Err(err) => Err(RetryError::Permanent(err)),
                }
            }
        })
        .await
    }
}

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded retry with a fixed delay between attempts.
///
/// `max_attempts` counts the first call, so `max_attempts = 4` means one
/// call plus three retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct MaxRetriesExceeded<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy with no waiting between attempts (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `label` is only used for log lines.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, MaxRetriesExceeded<E>>
    where
        E: std::error::Error,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    log::error!("❌ {}: attempt {}/{} failed, giving up: {}", label, attempt, self.max_attempts, e);
                    return Err(MaxRetriesExceeded {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "⏳ {}: attempt {}/{} failed ({}), retrying in {}ms",
                        label,
                        attempt,
                        self.max_attempts,
                        e,
                        self.delay.as_millis()
                    );
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

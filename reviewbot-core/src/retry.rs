//! Bounded exponential backoff around the AI generation call.
//!
//! The wait schedule is a pure function of the attempt number, and sleeping
//! goes through the [`Sleeper`] trait, so the schedule is testable without
//! real delays. Only generation is ever retried; fetch and post failures are
//! final for a run.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::error::{GenerateError, ReviewError};

/// Maximum number of generation attempts, including the first.
pub const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Deterministic portion of the wait before retry number `retry` (1-based):
/// 2^retry seconds.
pub fn backoff_base_delay(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry.min(32))
}

/// Full wait before retry number `retry`: the base delay plus a uniform
/// random jitter in [0, 1) seconds.
pub fn backoff_delay(retry: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..1.0);
    backoff_base_delay(retry) + Duration::from_secs_f64(jitter)
}

/// Sleep abstraction so the retry loop can be tested without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` up to [`MAX_GENERATION_ATTEMPTS`] times.
///
/// Retryable failures wait out the backoff schedule and try again; a fatal
/// failure, or a retryable failure on the last attempt, aborts with a single
/// aggregated error naming the last cause and the attempts made. `op` must
/// be idempotent: each invocation re-issues the identical request.
pub async fn run_with_retry<T, F, Fut>(mut op: F, sleeper: &dyn Sleeper) -> Result<T, ReviewError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GenerateError>>,
{
    let mut last_error: Option<GenerateError> = None;

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(
                    "Generation attempt {}/{} hit overload: {}",
                    attempt,
                    MAX_GENERATION_ATTEMPTS,
                    err.message()
                );
                last_error = Some(err);
                if attempt < MAX_GENERATION_ATTEMPTS {
                    sleeper.sleep(backoff_delay(attempt)).await;
                }
            }
            Err(err) => {
                return Err(ReviewError::RemoteFatal {
                    message: err.message().to_string(),
                });
            }
        }
    }

    let last = last_error.map(|e| e.message().to_string()).unwrap_or_default();
    Err(ReviewError::RemoteRetryableExhausted {
        attempts: MAX_GENERATION_ATTEMPTS,
        last_error: last,
    })
}

use std::future::Future;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Exponential backoff: the delay doubles after every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl Backoff {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }
}

/// Runs `operation` until it succeeds or `backoff.max_attempts` is reached.
///
/// # Errors
/// Returns the last error, annotated with the number of attempts made.
pub async fn with_retry<T, F, Fut>(backoff: Backoff, label: &str, operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_retry_and_sleep(
        backoff,
        label,
        operation,
        tokio::time::sleep,
        log_retry(backoff, label),
    )
    .await
}

/// Like [`with_retry`], but gives up at once on an error `is_permanent`
/// accepts.
///
/// # Errors
/// Returns the last error, annotated with the number of attempts made.
pub async fn with_retry_unless<T, F, Fut, P>(
    backoff: Backoff,
    label: &str,
    operation: F,
    is_permanent: P,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    retry_loop(
        backoff,
        label,
        operation,
        tokio::time::sleep,
        log_retry(backoff, label),
        is_permanent,
    )
    .await
}

/// Retries an operation using custom sleep logic between attempts.
///
/// # Errors
/// Returns the last error, annotated with the number of attempts made.
pub async fn with_retry_and_sleep<T, F, Fut, SleepFn, SleepFut, OnRetry>(
    backoff: Backoff,
    label: &str,
    operation: F,
    sleep_fn: SleepFn,
    on_retry: OnRetry,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    SleepFn: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
    OnRetry: FnMut(u32, Duration, &anyhow::Error),
{
    retry_loop(backoff, label, operation, sleep_fn, on_retry, |_| false).await
}

fn log_retry(backoff: Backoff, label: &str) -> impl FnMut(u32, Duration, &anyhow::Error) + '_ {
    move |attempt, delay, err| {
        warn!(
            "{label} failed (attempt {attempt}/{}), retrying in {}: {err:#}",
            backoff.max_attempts,
            humantime::format_duration(delay)
        );
    }
}

async fn retry_loop<T, F, Fut, SleepFn, SleepFut, OnRetry, P>(
    backoff: Backoff,
    label: &str,
    mut operation: F,
    mut sleep_fn: SleepFn,
    mut on_retry: OnRetry,
    is_permanent: P,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    SleepFn: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
    OnRetry: FnMut(u32, Duration, &anyhow::Error),
    P: Fn(&anyhow::Error) -> bool,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts || is_permanent(&err) => {
                return Err(err.context(format!("{label} failed after {attempt} attempt(s)")));
            }
            Err(err) => {
                let delay = backoff.delay_after(attempt);
                on_retry(attempt, delay, &err);
                sleep_fn(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_delay_doubles_from_seed() {
        let backoff = Backoff::new(5, Duration::from_secs(2));
        assert_eq!(backoff.delay_after(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_after(4), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_saturates_instead_of_overflowing() {
        let backoff = Backoff::new(64, Duration::from_secs(u64::MAX / 2));
        assert_eq!(backoff.delay_after(40), Duration::MAX);
    }

    #[tokio::test]
    async fn test_returns_first_success_and_sleeps_between_failures() {
        let calls = Arc::new(Mutex::new(0u32));
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let backoff = Backoff::new(5, Duration::from_secs(2));

        let value = with_retry_and_sleep(
            backoff,
            "probe",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    if *guard < 3 {
                        anyhow::bail!("not yet");
                    }
                    Ok(*guard)
                }
            },
            |delay| {
                sleeps.lock().unwrap().push(delay);
                async {}
            },
            |_, _, _| {},
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count_and_last_error() {
        let calls = Arc::new(Mutex::new(0u32));
        let mut retried = Vec::new();

        let err = with_retry_and_sleep(
            Backoff::new(3, Duration::ZERO),
            "unseal share",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    Err::<(), _>(anyhow::anyhow!("boom {}", *guard))
                }
            },
            |_| async {},
            |attempt, _, _| retried.push(attempt),
        )
        .await
        .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(retried, vec![1, 2]);
        assert_eq!(err.to_string(), "unseal share failed after 3 attempt(s)");
        assert_eq!(err.root_cause().to_string(), "boom 3");
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result = with_retry(Backoff::new(0, Duration::ZERO), "noop", || async {
            Ok::<_, anyhow::Error>(7)
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_retrying() {
        let calls = Arc::new(Mutex::new(0u32));

        let err = with_retry_unless(
            Backoff::new(5, Duration::ZERO),
            "unseal share",
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut guard = calls.lock().unwrap();
                    *guard += 1;
                    Err::<(), _>(anyhow::anyhow!("invalid key"))
                }
            },
            |err| err.to_string() == "invalid key",
        )
        .await
        .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(err.to_string(), "unseal share failed after 1 attempt(s)");
    }
}

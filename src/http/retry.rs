//! Retry logic for network operations with transient-error classification.

use anyhow::Result;
use log::{debug, warn};
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Maximum number of attempts (the first try included) for network operations.
pub const MAX_ATTEMPTS: usize = 3;

/// Fixed delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 2000;

/// Bounded, fixed-interval re-execution of an async unit of work.
///
/// Which failures are worth another attempt is decided by the predicate handed
/// to [`RetryPolicy::run`]; the policy itself only counts and waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt bound and delay.
    /// An attempt bound of zero is treated as one.
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt bound is reached.
    ///
    /// The error of the last attempt is returned as-is. Dropping the returned
    /// future cancels the loop at its current await point, including the
    /// backoff sleep; no attempt starts after that.
    pub async fn run<F, Fut, T, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&anyhow::Error) -> bool,
    {
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !is_retryable(&err) {
                debug!("{}: non-retryable error: {}", operation_name, err);
                return Err(err);
            }

            if attempt >= self.max_attempts {
                debug!(
                    "{}: giving up after {} attempts: {}",
                    operation_name, attempt, err
                );
                return Err(err);
            }

            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                operation_name,
                attempt,
                self.max_attempts,
                err,
                self.delay.as_millis()
            );
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}

/// Default classifier: connection failures and timeouts are transient,
/// everything else is permanent.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return is_transient_reqwest(e);
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            return is_transient_io(e);
        }
        false
    })
}

fn is_transient_reqwest(e: &reqwest::Error) -> bool {
    if e.is_builder() || e.is_redirect() || e.is_status() {
        return false;
    }
    if e.is_timeout() || e.is_connect() || e.is_request() {
        return true;
    }
    // A body cut off mid-stream is a dropped connection, a malformed one is not
    e.is_body() && io_source(e).is_some()
}

fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

fn io_source(e: &reqwest::Error) -> Option<&io::Error> {
    let mut source = e.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refused() -> anyhow::Error {
        anyhow::Error::from(io::Error::from(io::ErrorKind::ConnectionRefused))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn test_is_transient_io_kinds() {
        assert!(is_transient(&refused()));
        assert!(is_transient(&anyhow::Error::from(io::Error::from(
            io::ErrorKind::ConnectionReset
        ))));
        assert!(is_transient(&anyhow::Error::from(io::Error::from(
            io::ErrorKind::TimedOut
        ))));
        assert!(!is_transient(&anyhow::Error::from(io::Error::from(
            io::ErrorKind::PermissionDenied
        ))));
    }

    #[test]
    fn test_is_transient_sees_through_context() {
        let err = refused().context("Failed to send request");
        assert!(is_transient(&err));
    }

    #[test]
    fn test_generic_error_is_permanent() {
        assert!(!is_transient(&anyhow::anyhow!("connection reset by peer")));
    }

    #[test]
    fn test_builder_error_is_permanent() {
        let err = reqwest::Proxy::all("http://exa mple.com").unwrap_err();
        assert!(!is_transient(&anyhow::Error::from(err)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop a listener to get a port nobody is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(is_transient(&anyhow::Error::from(err)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_success_first_try() {
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();
        let result = policy
            .run("test", is_transient, || async { Ok::<_, anyhow::Error>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_on_third_attempt() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("test", is_transient, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst);
                    if count < 2 { Err(refused()) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two backoff waits, no more
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts_and_returns_original_error() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("test", is_transient, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(refused().context(format!("attempt {}", n)))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert_eq!(err.to_string(), "attempt 3");
        assert_eq!(
            err.downcast_ref::<io::Error>().map(|e| e.kind()),
            Some(io::ErrorKind::ConnectionRefused)
        );
        // No sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_non_retryable_fails_immediately() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("test", is_transient, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("unsupported method"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uses_injected_classifier() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = policy
            .run(
                "test",
                |_| true,
                || {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(anyhow::anyhow!("anything goes"))
                    }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_attempts() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicUsize::new(0));

        let run = policy.run("test", is_transient, || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            }
        });

        // Cancel halfway through the first backoff
        let outcome = tokio::time::timeout(Duration::from_secs(1), run).await;
        assert!(outcome.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_task_stops_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let handle = tokio::spawn(async move {
            RetryPolicy::default()
                .run("test", is_transient, || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(refused())
                    }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.abort();
        let joined = handle.await;
        assert!(joined.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

//! Failure classification and exponential backoff.

use std::time::Duration;

use crate::{CancelToken, CurlError, Result, RetryConfig};

/// Whether `err` may be re-attempted under `config`.
///
/// Status failures retry on 5xx, 408 and 429. Transport failures retry when
/// either `retry_on_connection_failure` or `retry_on_timeout` is set.
pub fn is_retryable(err: &CurlError, config: &RetryConfig) -> bool {
    match err {
        CurlError::Http { .. } => err.is_retryable_status(),
        CurlError::Transport(_) => config.retry_on_connection_failure || config.retry_on_timeout,
        _ => false,
    }
}

/// Delays before each retry: `retry_delay`, then multiplied by `backoff_multiplier`.
#[derive(Clone, Debug)]
pub struct Backoff {
    next_ms: f64,
    multiplier: f64,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        let multiplier = if config.backoff_multiplier.is_finite() {
            config.backoff_multiplier.max(0.0)
        } else {
            1.0
        };
        Self {
            next_ms: config.retry_delay_ms as f64,
            multiplier,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = Duration::from_millis(self.next_ms.min(u64::MAX as f64) as u64);
        self.next_ms *= self.multiplier;
        Some(delay)
    }
}

/// Runs `attempt` up to `max_retries + 1` times, blocking the calling thread
/// between attempts. The last failure is returned unchanged.
///
/// `cancel` is checked before every attempt and ends a backoff wait early; a
/// call already in progress is never interrupted.
pub fn execute_with_retry<T, F>(config: &RetryConfig, cancel: &CancelToken, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut backoff = Backoff::new(config);
    let mut index = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(CurlError::Cancelled);
        }

        let err = match attempt(index) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if index >= config.max_retries || !is_retryable(&err, config) {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = index + 1, error = %err, "request failed");
            return Err(err);
        }

        let delay = backoff.next().unwrap_or_default();
        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms: {}", delay.as_millis(), err);
        if cancel.wait_for(delay) {
            return Err(CurlError::Cancelled);
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{execute_with_retry, is_retryable, Backoff};
    use crate::{CancelToken, CurlError, RetryConfig, TransportError};

    fn status(status: u16) -> CurlError {
        CurlError::Http {
            status,
            status_message: String::new(),
            body: String::new(),
        }
    }

    fn config(max_retries: u32, retry_delay_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay_ms,
            backoff_multiplier: 2.0,
            retry_on_connection_failure: false,
            retry_on_timeout: false,
        }
    }

    #[test]
    fn classification() {
        let strict = config(3, 0);
        assert!(is_retryable(&status(500), &strict));
        assert!(is_retryable(&status(408), &strict));
        assert!(is_retryable(&status(429), &strict));
        assert!(!is_retryable(&status(404), &strict));
        assert!(!is_retryable(&TransportError::timeout("slow").into(), &strict));

        let lenient = RetryConfig {
            retry_on_timeout: true,
            ..strict.clone()
        };
        assert!(is_retryable(&TransportError::connect("refused").into(), &lenient));
        assert!(!is_retryable(&CurlError::Cancelled, &lenient));
    }

    #[test]
    fn backoff_grows_by_multiplier() {
        let delays: Vec<_> = Backoff::new(&config(0, 100)).take(3).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[test]
    fn retries_retryable_status_until_exhausted() {
        let mut calls = 0;
        let started = Instant::now();
        let err = execute_with_retry(&config(2, 100), &CancelToken::new(), |_| -> crate::Result<()> {
            calls += 1;
            Err(status(500))
        })
        .expect_err("every attempt fails");

        assert_eq!(calls, 3);
        assert_eq!(err.status_code(), 500);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn non_retryable_status_fails_immediately() {
        let mut calls = 0;
        let err = execute_with_retry(&config(5, 1), &CancelToken::new(), |_| -> crate::Result<()> {
            calls += 1;
            Err(status(404))
        })
        .expect_err("404 is terminal");

        assert_eq!(calls, 1);
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn succeeds_after_transient_failure() {
        let value = execute_with_retry(&config(2, 1), &CancelToken::new(), |attempt| {
            if attempt == 0 {
                Err(status(503))
            } else {
                Ok(attempt)
            }
        })
        .expect("second attempt succeeds");
        assert_eq!(value, 1);
    }

    #[test]
    fn cancelled_token_prevents_the_next_attempt() {
        let cancel = CancelToken::new();
        let mut calls = 0;
        let err = execute_with_retry(&config(3, 1), &cancel, |_| -> crate::Result<()> {
            calls += 1;
            cancel.cancel();
            Err(status(500))
        })
        .expect_err("cancelled between attempts");

        assert_eq!(calls, 1);
        assert_eq!(err, CurlError::Cancelled);
    }

    #[test]
    fn cancelling_interrupts_a_long_backoff() {
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            })
        };

        let mut calls = 0;
        let started = Instant::now();
        let err = execute_with_retry(&config(3, 5_000), &cancel, |_| -> crate::Result<()> {
            calls += 1;
            Err(status(503))
        })
        .expect_err("cancelled during backoff");
        canceller.join().expect("canceller must not panic");

        assert_eq!(err, CurlError::Cancelled);
        assert_eq!(calls, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

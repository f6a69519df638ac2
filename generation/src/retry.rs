//! Retry policy for the HTTP gateway.
//!
//! Retries are opt-in: [`RetryConfig::default`] makes a single attempt and
//! callers that want more say so. Retryable conditions are HTTP 408, 409,
//! 429 and 5xx, plus connect and timeout failures. `Retry-After` (seconds)
//! and `Retry-After-Ms` are honored when under a minute; otherwise the delay
//! doubles from `initial_delay` up to `max_delay`.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    fn backoff(&self, step: u32) -> Duration {
        let factor = 2_u32.saturating_pow(step);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let limit = Duration::from_secs(60);
    let millis = headers
        .get("retry-after-ms")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0));
    let seconds = headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs);
    millis
        .or(seconds)
        .filter(|delay| *delay > Duration::ZERO && *delay < limit)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

pub(crate) enum Attempted {
    /// Any HTTP response: success, or a failure that was not retried further.
    Response(Response),
    Failed {
        attempts: u32,
        source: reqwest::Error,
    },
}

/// Send the request built by `build_request`, retrying per `config`.
///
/// Every attempt carries the same `Idempotency-Key`.
pub(crate) async fn send_with_retry<F>(
    build_request: F,
    idempotency_key: &str,
    config: &RetryConfig,
) -> Attempted
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let request = build_request()
            .header("Idempotency-Key", idempotency_key)
            .header("X-Retry-Count", attempt.to_string());
        let exhausted = attempt >= config.max_retries;

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || exhausted || !is_retryable_status(status) {
                    return Attempted::Response(response);
                }
                let delay = retry_after(response.headers()).unwrap_or_else(|| config.backoff(attempt));
                tracing::debug!(
                    %status,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request after error status"
                );
                sleep(delay).await;
            }
            Err(source) => {
                if exhausted || !is_retryable_error(&source) {
                    return Attempted::Failed {
                        attempts: attempt + 1,
                        source,
                    };
                }
                let delay = config.backoff(attempt);
                tracing::debug!(
                    error = %source,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request after connection error"
                );
                sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

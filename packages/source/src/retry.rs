//! HTTP retry helpers for transient errors.
//!
//! Every network fetch in the source adapters goes through [`send`] or
//! [`send_text`] rather than calling `reqwest::RequestBuilder::send()`
//! directly, so listing pages, redirect probes, signed downloads and
//! archive downloads all share one [`RetryPolicy`] and all observe the
//! run's [`CancellationToken`].
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry;
//!
//! let html = retry::send_text(&policy, &cancel, || client.get(&url)).await?;
//! let response = retry::send(&policy, &cancel, || client.get(&url)).await?;
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::SourceError;

/// Maximum length of the response body excerpt carried in errors and logs.
pub const BODY_EXCERPT_LEN: usize = 200;

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds; doubles each time.
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
        }
    }
}

/// Sends an HTTP request, retrying transient failures.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// Returns the response for any 2xx or 3xx status. Retries connection
/// errors, timeouts, HTTP 429 and HTTP 5xx with exponential backoff. Other
/// 4xx statuses are permanent and returned as [`SourceError::HttpStatus`]
/// with an excerpt of the body.
///
/// # Errors
///
/// Returns [`SourceError`] once retries are exhausted, on a permanent
/// status, or [`SourceError::Cancelled`] if `cancel` fires first.
pub async fn send<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    build_request: F,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            log::warn!("  retry {attempt}/{} in {delay:?}...", policy.max_retries);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SourceError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = build_request().send() => result,
        };

        let can_retry = attempt < policy.max_retries;
        attempt += 1;

        match result {
            Err(e) => {
                if is_transient(&e) && can_retry {
                    log::warn!("  transient error: {e}");
                    continue;
                }
                return Err(SourceError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    if can_retry {
                        log::warn!("  HTTP {status} from {}", response.url());
                        continue;
                    }
                    return Err(status_error(response).await);
                }

                if status.is_client_error() {
                    return Err(status_error(response).await);
                }

                return Ok(response);
            }
        }
    }
}

/// Sends an HTTP request and returns the body as text.
///
/// A 3xx response is treated as an error here since a page body is
/// expected. If the body cannot be read the whole request is re-fetched,
/// up to [`RetryPolicy::max_retries`] times.
///
/// # Errors
///
/// Same as [`send`], plus [`SourceError::Http`] if the body never reads.
pub async fn send_text<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    build_request: F,
) -> Result<String, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt: u32 = 0;

    loop {
        let response = send(policy, cancel, &build_request).await?;
        if response.status().is_redirection() {
            return Err(status_error(response).await);
        }

        let url = response.url().to_string();
        match response.text().await {
            Ok(text) => return Ok(text),
            Err(e) if body_attempt < policy.max_retries => {
                body_attempt += 1;
                log::warn!(
                    "Body read failed for {url} (body retry {body_attempt}/{}): {e}",
                    policy.max_retries
                );
            }
            Err(e) => return Err(SourceError::Http(e)),
        }
    }
}

/// Builds a [`SourceError::HttpStatus`] from a response, consuming its body
/// for the excerpt.
pub(crate) async fn status_error(response: reqwest::Response) -> SourceError {
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    SourceError::HttpStatus {
        url,
        status,
        excerpt: excerpt(&body, BODY_EXCERPT_LEN),
    }
}

/// Truncates `text` to at most `max` bytes on a character boundary,
/// marking the cut with `...`.
#[must_use]
pub fn excerpt(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

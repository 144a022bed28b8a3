use super::{ExecuteOptions, Transport, IDEMPOTENCY_KEY_HEADER};
use crate::config::RetryConfig;
use crate::context::CallContext;
use crate::error::{is_retryable_status, ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Retries transient failures of retry-safe requests.
///
/// A request is retry-safe when its method is read-only (GET, HEAD,
/// OPTIONS) or when it carries an `Idempotency-Key` header. Transient means
/// a 429/500/502/503/504 status or any transport failure other than
/// cancellation and deadline expiry. The last attempt's outcome is returned
/// as is, success or not.
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    config: RetryConfig,
}

impl RetryTransport {
    pub fn new(inner: Arc<dyn Transport>, config: RetryConfig) -> Self {
        Self {
            inner,
            config: config.normalized(),
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Whether repeating `request` cannot cause duplicate side effects
pub fn can_retry_request(request: &Request) -> bool {
    is_safe_method(request.method())
        || request
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .map_or(false, |v| !v.is_empty())
}

/// `min(base * 2^(attempt-1), max)` with a uniform ±20% jitter.
/// `attempt` is 1 for the delay before the first retry.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1));
    let delay = factor
        .and_then(|f| base.checked_mul(f))
        .map_or(max, |d| d.min(max));
    jitter(delay)
}

fn jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    delay.mul_f64(factor)
}

/// Parse a `Retry-After` value: delta seconds or an HTTP-date.
/// Values in the past, or negative, wait zero.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }

    let at = parse_http_date(value)?;
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

// IMF-fixdate, RFC 850 and asctime, in that order of preference
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

#[async_trait]
impl Transport for RetryTransport {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: Request,
        options: ExecuteOptions,
    ) -> Result<Response> {
        let max_attempts = self.config.max_attempts;
        if max_attempts <= 1 || !can_retry_request(&request) {
            return self.inner.execute(ctx, request, options).await;
        }

        let mut attempt = 1;
        loop {
            // Bodies that cannot be replayed get exactly one attempt
            let current = match request.try_clone() {
                Some(current) => current,
                None => return self.inner.execute(ctx, request, options).await,
            };

            let result = self.inner.execute(ctx, current, options).await;

            let wait = match &result {
                Ok(response) if !is_retryable_status(response.status().as_u16()) => {
                    return result
                }
                Err(err) if !err.is_retryable() => return result,
                _ if attempt >= max_attempts => return result,
                Ok(response) => retry_after(response.headers()).unwrap_or_else(|| {
                    backoff_delay(self.config.base_delay, self.config.max_delay, attempt)
                }),
                Err(_) => backoff_delay(self.config.base_delay, self.config.max_delay, attempt),
            };

            debug!(
                attempt,
                method = %request.method(),
                url = %request.url(),
                wait_ms = wait.as_millis() as u64,
                status_code = result.as_ref().map_or(0, |r| r.status().as_u16()),
                error = %result.as_ref().err().map(ClientError::to_string).unwrap_or_default(),
                "driftq.retry"
            );
            drop(result);

            if !wait.is_zero() {
                tokio::select! {
                    biased;
                    err = ctx.done() => return Err(err),
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(method: Method) -> Request {
        Request::new(method, "http://localhost/v1/produce".parse().unwrap())
    }

    #[test]
    fn test_retry_safety() {
        assert!(can_retry_request(&request(Method::GET)));
        assert!(can_retry_request(&request(Method::HEAD)));
        assert!(can_retry_request(&request(Method::OPTIONS)));
        assert!(!can_retry_request(&request(Method::POST)));

        let mut post = request(Method::POST);
        post.headers_mut()
            .insert(IDEMPOTENCY_KEY_HEADER, "k-1".parse().unwrap());
        assert!(can_retry_request(&post));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_dates() {
        // Past dates wait zero in every format
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(
            parse_retry_after("Wednesday, 21-Oct-15 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(
            parse_retry_after("Wed Oct 21 07:28:00 2015"),
            Some(Duration::ZERO)
        );

        let future = (Utc::now() + chrono::Duration::seconds(120))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let wait = parse_retry_after(&future).unwrap();
        assert!(wait > Duration::from_secs(100) && wait <= Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_grows_then_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);

        let first = backoff_delay(base, max, 1);
        assert!(first >= Duration::from_millis(80) && first <= Duration::from_millis(120));

        let third = backoff_delay(base, max, 3);
        assert!(third >= Duration::from_millis(320) && third <= Duration::from_millis(480));

        let huge = backoff_delay(base, max, 64);
        assert!(huge >= Duration::from_millis(1600) && huge <= Duration::from_millis(2400));
    }

    proptest! {
        #[test]
        fn prop_backoff_within_jittered_cap(
            base_ms in 1u64..5_000,
            max_ms in 1u64..60_000,
            attempt in 1u32..100,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);
            let delay = backoff_delay(base, max, attempt);
            prop_assert!(delay <= max.mul_f64(1.2) + Duration::from_nanos(1));
            let floor = base.min(max).mul_f64(0.8);
            prop_assert!(delay + Duration::from_nanos(1) >= floor);
        }
    }
}

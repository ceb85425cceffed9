//! Shared outbound HTTP plumbing for the provider adapters.

use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use service_core::utils::redact::snippet;
use std::time::Duration;

use super::AdapterError;
use crate::config::HttpRetryConfig;

pub const USER_AGENT: &str = concat!("einvoice-service/", env!("CARGO_PKG_VERSION"));

/// Longest wait accepted from a provider rate-limit reset header.
const MAX_RESET_WAIT: Duration = Duration::from_secs(60);

pub fn build_client(adapter: &'static str, timeout: Duration) -> Result<Client, AdapterError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AdapterError::Config {
            adapter,
            message: format!("failed to build HTTP client: {e}"),
        })
}

pub fn transport_error(adapter: &'static str, err: reqwest::Error) -> AdapterError {
    AdapterError::Transport {
        adapter,
        message: err.without_url().to_string(),
    }
}

/// Turn a non-success response into an error with a redacted body snippet.
pub async fn error_from_response(
    adapter: &'static str,
    response: Response,
    secrets: &[&str],
) -> AdapterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        snippet(&body, secrets)
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return AdapterError::Auth { adapter, message };
    }
    AdapterError::Http {
        adapter,
        status: status.as_u16(),
        message,
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Interpret `x-ratelimit-reset`: epoch milliseconds, epoch seconds, or
/// seconds from now, depending on magnitude.
pub fn parse_rate_limit_reset(raw: &str, now_ms: i64) -> Option<Duration> {
    let numeric: f64 = raw.trim().parse().ok()?;
    if !numeric.is_finite() || numeric < 0.0 {
        return None;
    }
    let wait_ms = if numeric > 1_000_000_000_000.0 {
        numeric - now_ms as f64
    } else if numeric > 1_000_000_000.0 {
        numeric * 1000.0 - now_ms as f64
    } else {
        numeric * 1000.0
    };
    Some(Duration::from_millis(wait_ms.max(0.0) as u64))
}

/// Delay before HTTP retry number `retry` (0-based).
pub fn http_retry_delay(policy: &HttpRetryConfig, retry: u32, reset: Option<Duration>) -> Duration {
    let exp = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(retry))
        .min(policy.max_delay);
    let delay = match reset {
        Some(reset) if reset > exp => reset.min(MAX_RESET_WAIT),
        _ => exp,
    };

    let spread = (delay / 2).min(Duration::from_millis(250));
    if spread.is_zero() {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(Duration::ZERO..=spread);
    delay.saturating_sub(spread / 2) + offset
}

/// Send, retrying 429, 5xx and connection failures.
///
/// After the last retry the final response is returned as-is so the caller
/// can turn it into an error with the provider's message.
pub async fn send_with_http_retry<F>(
    adapter: &'static str,
    policy: &HttpRetryConfig,
    build: F,
) -> Result<Response, AdapterError>
where
    F: Fn() -> RequestBuilder,
{
    let mut retry = 0u32;
    loop {
        match build().send().await {
            Ok(response) if is_retryable_status(response.status()) && retry < policy.max_retries => {
                let reset = response
                    .headers()
                    .get("x-ratelimit-reset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_rate_limit_reset(v, chrono::Utc::now().timestamp_millis()));
                let delay = http_retry_delay(policy, retry, reset);
                tracing::warn!(
                    adapter,
                    status = response.status().as_u16(),
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient provider response, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Ok(response) => return Ok(response),
            Err(err) if is_retryable_transport(&err) && retry < policy.max_retries => {
                let delay = http_retry_delay(policy, retry, None);
                tracing::warn!(
                    adapter,
                    error = %err.without_url(),
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Provider connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => return Err(transport_error(adapter, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_header_forms() {
        let now = 1_700_000_000_000i64;
        assert_eq!(parse_rate_limit_reset("2", now), Some(Duration::from_secs(2)));
        assert_eq!(
            parse_rate_limit_reset("1700000003", now),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_rate_limit_reset("1700000000500", now),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_rate_limit_reset("soon", now), None);
    }

    #[test]
    fn retry_delay_is_capped_and_jittered() {
        let policy = HttpRetryConfig::default();
        for retry in 0..8 {
            let delay = http_retry_delay(&policy, retry, None);
            assert!(delay <= policy.max_delay + Duration::from_millis(125));
        }
        let first = http_retry_delay(&policy, 0, None);
        assert!(first >= Duration::from_millis(375) && first <= Duration::from_millis(625));

        let waited = http_retry_delay(&policy, 0, Some(Duration::from_secs(3)));
        assert!(waited >= Duration::from_millis(2875));
    }
}

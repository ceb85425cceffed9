use crate::error::AppError;
use crate::middleware::api_key::ApiKey;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter keyed by caller API key.
pub type KeyedRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

/// Allow `requests` per `window` for every key, with the full amount as burst.
pub fn create_keyed_rate_limiter(requests: u32, window: Duration) -> KeyedRateLimiter {
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let period = (window / burst.get()).max(Duration::from_millis(1));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Per-API-key limiting. Must run after `require_api_key`.
pub async fn api_key_rate_limit_middleware(
    State(limiter): State<KeyedRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ApiKey(key)) = request.extensions().get::<ApiKey>().cloned() else {
        return Ok(next.run(request).await);
    };

    match limiter.check_key(&key) {
        Ok(_) => Ok(next.run(request).await),
        Err(negative) => {
            let wait_time = negative.wait_time_from(DefaultClock::default().now());
            tracing::warn!(wait_ms = wait_time.as_millis() as u64, "Rate limit exceeded");
            Err(AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(wait_time.as_secs().max(1)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_limited_independently() {
        let limiter = create_keyed_rate_limiter(2, Duration::from_secs(60));
        let a = "key-a".to_string();
        let b = "key-b".to_string();

        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_err());
        assert!(limiter.check_key(&b).is_ok());
    }
}

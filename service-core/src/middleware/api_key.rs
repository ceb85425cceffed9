use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The set of API keys accepted by a service.
#[derive(Clone, Default)]
pub struct ApiKeys {
    keys: Arc<Vec<Secret<String>>>,
}

impl ApiKeys {
    pub fn new(keys: Vec<Secret<String>>) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Constant-time membership check.
    pub fn contains(&self, candidate: &str) -> bool {
        let candidate = candidate.as_bytes();
        self.keys.iter().fold(false, |found, key| {
            let key = key.expose_secret().as_bytes();
            let matches = key.len() == candidate.len() && bool::from(key.ct_eq(candidate));
            found | matches
        })
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("count", &self.keys.len())
            .finish()
    }
}

/// Authenticated caller key, inserted as a request extension.
#[derive(Clone, Debug)]
pub struct ApiKey(pub String);

/// Reject requests without a known `x-api-key`.
///
/// Missing key is a 401, an unknown key a 403.
pub async fn require_api_key<S>(
    State(state): State<S>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: AsRef<ApiKeys> + Clone + Send + Sync + 'static,
{
    let keys = state.as_ref();
    if keys.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "No API keys configured"
        )));
    }

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized("missing_api_key", anyhow::anyhow!("Missing x-api-key header"))
        })?;

    if !keys.contains(&provided) {
        tracing::warn!("Rejected request with unknown API key");
        return Err(AppError::Forbidden(anyhow::anyhow!("Invalid API key")));
    }

    req.extensions_mut().insert(ApiKey(provided));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_requires_exact_match() {
        let keys = ApiKeys::new(vec![
            Secret::new("alpha".to_string()),
            Secret::new("beta-key".to_string()),
        ]);
        assert!(keys.contains("alpha"));
        assert!(keys.contains("beta-key"));
        assert!(!keys.contains("alph"));
        assert!(!keys.contains("beta-key2"));
        assert!(!keys.contains(""));
    }
}

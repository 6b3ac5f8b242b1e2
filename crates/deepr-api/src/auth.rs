// API key authentication
// Decision: keys are prefixed with "dpr_" for identification
// Decision: the server keeps only the SHA-256 hash of the configured key

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use sha2::{Digest, Sha256};

use deepr_core::DeeprError;

use crate::common::ApiError;

/// API key prefix for identification
pub const API_KEY_PREFIX: &str = "dpr_";
const API_KEY_LENGTH: usize = 32; // 32 random bytes = 64 hex chars

/// Auth configuration for the HTTP surface
///
/// With no key configured, all requests pass (local development).
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    key_hash: Option<String>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key_hash: Some(hash_api_key(key)),
        }
    }

    pub fn from_env() -> Self {
        match std::env::var("DEEPR_API_KEY") {
            Ok(key) if !key.is_empty() => Self::with_key(&key),
            _ => {
                tracing::warn!("DEEPR_API_KEY not set; API authentication disabled");
                Self::disabled()
            }
        }
    }

    fn accepts(&self, presented: Option<&str>) -> bool {
        match (&self.key_hash, presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => &hash_api_key(presented) == expected,
            (Some(_), None) => false,
        }
    }
}

/// Generated API key (full key shown only at creation)
#[derive(Debug)]
pub struct GeneratedApiKey {
    pub key: String,
    pub key_hash: String,
}

/// Generate a new API key
pub fn generate_api_key() -> GeneratedApiKey {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..API_KEY_LENGTH).map(|_| rng.gen()).collect();
    let key = format!("{}{}", API_KEY_PREFIX, hex::encode(&random_bytes));
    let key_hash = hash_api_key(&key);
    GeneratedApiKey { key, key_hash }
}

/// Hash an API key for storage/lookup
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Middleware: accept `Authorization: Bearer <key>` or `X-Api-Key: <key>`
pub async fn require_api_key(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
        });

    if auth.accepts(presented) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError(DeeprError::Auth("missing or invalid API key".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_hash() {
        let generated = generate_api_key();
        assert!(generated.key.starts_with(API_KEY_PREFIX));
        assert_eq!(generated.key_hash, hash_api_key(&generated.key));
    }

    #[test]
    fn config_accepts_matching_key_only() {
        let auth = AuthConfig::with_key("dpr_secret");
        assert!(auth.accepts(Some("dpr_secret")));
        assert!(!auth.accepts(Some("dpr_wrong")));
        assert!(!auth.accepts(None));
    }

    #[test]
    fn disabled_config_accepts_everything() {
        let auth = AuthConfig::disabled();
        assert!(auth.accepts(None));
        assert!(auth.accepts(Some("anything")));
    }
}

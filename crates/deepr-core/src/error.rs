// Error types for the research engine

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use deepr_contracts::{ErrorBody, ErrorKind};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DeeprError>;

/// Errors that can occur across the engine
///
/// Variants mirror the user-visible error taxonomy; `Storage` wraps
/// everything internal that callers cannot act on.
#[derive(Debug, Error)]
pub enum DeeprError {
    // Input
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("budget too low: {0}")]
    BudgetTooLow(String),

    // Budget
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    // Provider
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider 5xx: {0}")]
    Provider5xx(String),

    #[error("provider auth failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider lost job {0}")]
    ProviderLostJob(String),

    #[error("network error: {0}")]
    Network(String),

    // Timeout
    #[error("submit timed out after {0:?}")]
    SubmitTimeout(Duration),

    // Not-found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("expert not found: {0}")]
    ExpertNotFound(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(Uuid),

    // Conflict
    #[error("entity {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),

    #[error("pause not applicable: {0}")]
    PauseNotApplicable(String),

    /// Internal storage or wiring error
    #[error("internal error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl DeeprError {
    /// Create a rate-limited error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        DeeprError::RateLimited(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        DeeprError::Network(msg.into())
    }

    /// Create an invalid-request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        DeeprError::InvalidRequest(msg.into())
    }

    /// Taxonomy kind for this error, if it has a user-visible one
    pub fn kind(&self) -> Option<ErrorKind> {
        let kind = match self {
            DeeprError::InvalidPrompt(_) => ErrorKind::InvalidPrompt,
            DeeprError::UnknownModel(_) => ErrorKind::UnknownModel,
            DeeprError::UnknownProvider(_) => ErrorKind::UnknownProvider,
            DeeprError::BudgetTooLow(_) => ErrorKind::BudgetTooLow,
            DeeprError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            DeeprError::RateLimited(_) => ErrorKind::RateLimited,
            DeeprError::Provider5xx(_) => ErrorKind::Provider5xx,
            DeeprError::Auth(_) => ErrorKind::Auth,
            DeeprError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DeeprError::ProviderLostJob(_) => ErrorKind::ProviderLostJob,
            DeeprError::Network(_) => ErrorKind::Network,
            DeeprError::SubmitTimeout(_) => ErrorKind::SubmitTimeout,
            DeeprError::JobNotFound(_) => ErrorKind::JobNotFound,
            DeeprError::ExpertNotFound(_) => ErrorKind::ExpertNotFound,
            DeeprError::CampaignNotFound(_) => ErrorKind::CampaignNotFound,
            DeeprError::AlreadyTerminal(_) => ErrorKind::AlreadyTerminal,
            DeeprError::PauseNotApplicable(_) => ErrorKind::PauseNotApplicable,
            DeeprError::Storage(_) => return None,
        };
        Some(kind)
    }

    /// Whether the owning component should retry with backoff
    pub fn is_retryable(&self) -> bool {
        self.kind().map(|k| k.is_retryable()).unwrap_or(false)
    }

    /// Wire-level body for this error
    pub fn to_body(&self) -> ErrorBody {
        match self.kind() {
            Some(kind) => ErrorBody::new(kind, self.to_string()),
            None => ErrorBody {
                code: "internal".to_string(),
                message: self.to_string(),
                retry_hint: None,
                fallback_suggestion: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_taxonomy() {
        assert!(DeeprError::rate_limited("slow down").is_retryable());
        assert!(DeeprError::network("reset").is_retryable());
        assert!(DeeprError::Provider5xx("boom".into()).is_retryable());
        assert!(!DeeprError::Auth("denied".into()).is_retryable());
        assert!(!DeeprError::SubmitTimeout(Duration::from_secs(60)).is_retryable());
    }

    #[test]
    fn storage_errors_map_to_internal_code() {
        let err = DeeprError::Storage(anyhow::anyhow!("db gone"));
        let body = err.to_body();
        assert_eq!(body.code, "internal");
    }

    #[test]
    fn body_carries_taxonomy_code() {
        let err = DeeprError::BudgetExceeded("daily cap".into());
        assert_eq!(err.to_body().code, "budget_exceeded");
    }
}

// Wire-level error body returned by every entry point

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::job::ErrorKind;

/// User-visible error payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code from the error taxonomy
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_suggestion: Option<String>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retry_hint = kind
            .is_retryable()
            .then(|| "retry with exponential backoff".to_string());
        Self {
            code: kind.code().to_string(),
            message: message.into(),
            retry_hint,
            fallback_suggestion: None,
        }
    }

    pub fn with_fallback(mut self, suggestion: impl Into<String>) -> Self {
        self.fallback_suggestion = Some(suggestion.into());
        self
    }
}

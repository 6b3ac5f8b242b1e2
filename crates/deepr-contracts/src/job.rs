// Job DTOs (unit of work dispatched to one research provider)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Job status
///
/// Valid transitions:
/// pending -> submitting | admission_rejected
/// submitting -> processing | failed
/// processing -> completed | failed | cancelled
/// pending/submitting may also be cancelled directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Submitting,
    Processing,
    Completed,
    Failed,
    Cancelled,
    AdmissionRejected,
}

impl JobStatus {
    /// Terminal states can never be left
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::AdmissionRejected
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Submitting) | (Pending, AdmissionRejected) | (Pending, Cancelled) => true,
            (Submitting, Processing) | (Submitting, Failed) | (Submitting, Cancelled) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Submitting => "submitting",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::AdmissionRejected => "admission_rejected",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "submitting" => Ok(JobStatus::Submitting),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "admission_rejected" => Ok(JobStatus::AdmissionRejected),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Research provider backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Azure,
    Gemini,
    Grok,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Grok => "grok",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::OpenAi,
            ProviderKind::Azure,
            ProviderKind::Gemini,
            ProviderKind::Grok,
            ProviderKind::Anthropic,
        ]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "azure" => Ok(ProviderKind::Azure),
            "gemini" => Ok(ProviderKind::Gemini),
            "grok" => Ok(ProviderKind::Grok),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Tool attached to a research job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSpec {
    WebSearch,
    FileSearch { store_ref: String },
    CodeInterpreter,
    Mcp { server_url: String },
}

impl ToolSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ToolSpec::WebSearch => "web_search",
            ToolSpec::FileSearch { .. } => "file_search",
            ToolSpec::CodeInterpreter => "code_interpreter",
            ToolSpec::Mcp { .. } => "mcp",
        }
    }
}

/// Error taxonomy shared across the engine and the HTTP surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Input
    InvalidPrompt,
    UnknownModel,
    UnknownProvider,
    BudgetTooLow,
    // Budget
    BudgetExceeded,
    RequiresElicitation,
    // Provider
    RateLimited,
    #[serde(rename = "provider_5xx")]
    Provider5xx,
    Auth,
    InvalidRequest,
    ProviderLostJob,
    Network,
    // Timeout
    SubmitTimeout,
    StuckJobFlag,
    // Not-found
    JobNotFound,
    ExpertNotFound,
    CampaignNotFound,
    // Conflict
    AlreadyTerminal,
    PauseNotApplicable,
}

impl ErrorKind {
    /// Kinds the owning component retries with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Provider5xx | ErrorKind::Network
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPrompt => "invalid_prompt",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::UnknownProvider => "unknown_provider",
            ErrorKind::BudgetTooLow => "budget_too_low",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::RequiresElicitation => "requires_elicitation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Provider5xx => "provider_5xx",
            ErrorKind::Auth => "auth",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ProviderLostJob => "provider_lost_job",
            ErrorKind::Network => "network",
            ErrorKind::SubmitTimeout => "submit_timeout",
            ErrorKind::StuckJobFlag => "stuck_job_flag",
            ErrorKind::JobNotFound => "job_not_found",
            ErrorKind::ExpertNotFound => "expert_not_found",
            ErrorKind::CampaignNotFound => "campaign_not_found",
            ErrorKind::AlreadyTerminal => "already_terminal",
            ErrorKind::PauseNotApplicable => "pause_not_applicable",
        }
    }
}

/// Error recorded on a failed job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Job - a single research request dispatched to one provider
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_store_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub priority: u8,
    /// Back-reference into the campaign topic that created this job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_topic_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_job_id: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_fraction: Option<f64>,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub override_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Content hash of the stored result artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_successors() {
        let terminals = [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::AdmissionRejected,
        ];
        let all = [
            JobStatus::Pending,
            JobStatus::Submitting,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::AdmissionRejected,
        ];
        for from in terminals {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn happy_path_is_legal() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Submitting));
        assert!(JobStatus::Submitting.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Submitting,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::AdmissionRejected,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn provider_5xx_serializes_with_numeric_suffix() {
        let json = serde_json::to_string(&ErrorKind::Provider5xx).unwrap();
        assert_eq!(json, "\"provider_5xx\"");
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::SubmitTimeout.is_retryable());
    }

    #[test]
    fn tool_spec_tagged_encoding() {
        let tool = ToolSpec::FileSearch {
            store_ref: "vs_123".into(),
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "file_search");
        assert_eq!(json["store_ref"], "vs_123");
    }
}

// Database models (internal, may differ from public DTOs)
//
// JSON-valued columns (tools, metadata, citations, …) are stored as TEXT
// and parsed in the row → DTO conversions below.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use deepr_contracts::{
    Belief, Campaign, CampaignStatus, Citation, Expert, Gap, Job, JobError, JobStatus, Phase,
    ProviderKind, TokenUsage, ToolSpec, Topic, TopicState,
};

// ============================================
// Job models
// ============================================

/// Job row from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub provider: String,
    pub tools: String,
    pub vector_store_ref: Option<String>,
    pub budget_cap: Option<f64>,
    pub metadata: Option<String>,
    pub priority: i64,
    pub parent_topic_id: Option<Uuid>,
    pub provider_job_id: Option<String>,
    pub status: String,
    pub progress_fraction: Option<f64>,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub override_approved: bool,
    pub token_usage: Option<String>,
    pub error: Option<String>,
    pub result_ref: Option<String>,
    pub unknown_polls: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Last time the provider reported a progress change; drives stuck detection
    pub last_progress_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Pending)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.parse().unwrap_or(ProviderKind::OpenAi)
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        serde_json::from_str(&self.tools).unwrap_or_default()
    }

    pub fn job_error(&self) -> Option<JobError> {
        self.error
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn into_dto(self) -> Job {
        let status = self.status();
        let provider = self.provider_kind();
        let tools = self.tool_specs();
        let error = self.job_error();
        let token_usage: Option<TokenUsage> = self
            .token_usage
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        let metadata = self
            .metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        Job {
            id: self.id,
            prompt: self.prompt,
            model: self.model,
            provider,
            tools,
            vector_store_ref: self.vector_store_ref,
            budget_cap: self.budget_cap,
            metadata,
            priority: self.priority.clamp(1, 5) as u8,
            parent_topic_id: self.parent_topic_id,
            provider_job_id: self.provider_job_id,
            status,
            progress_fraction: self.progress_fraction,
            estimated_cost: self.estimated_cost,
            actual_cost: self.actual_cost,
            override_approved: self.override_approved,
            token_usage,
            error,
            result_ref: self.result_ref,
            created_at: self.created_at,
            started_at: self.started_at,
            last_poll_at: self.last_poll_at,
            completed_at: self.completed_at,
        }
    }
}

/// Input for creating a job (always persisted in `pending`)
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub provider: ProviderKind,
    pub tools: Vec<ToolSpec>,
    pub vector_store_ref: Option<String>,
    pub budget_cap: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub priority: u8,
    pub parent_topic_id: Option<Uuid>,
    pub estimated_cost: f64,
    pub override_approved: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields a single state transition may write
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct JobTransition {
    pub status: Option<JobStatus>,
    pub provider_job_id: Option<String>,
    pub progress_fraction: Option<f64>,
    pub actual_cost: Option<f64>,
    pub token_usage: Option<TokenUsage>,
    pub error: Option<JobError>,
    pub result_ref: Option<String>,
    pub unknown_polls: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================
// Campaign models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct CampaignRow {
    pub id: Uuid,
    pub goal: String,
    pub status: String,
    pub auto_continue: bool,
    pub max_rounds: i64,
    pub current_round: i64,
    pub budget_cap: Option<f64>,
    pub actual_cost: f64,
    pub expert_id: Option<Uuid>,
    pub gap_id: Option<Uuid>,
    pub planner_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CampaignRow {
    pub fn status(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Planning)
    }

    pub fn into_dto(self, phases: Vec<Phase>) -> Campaign {
        let status = self.status();
        Campaign {
            id: self.id,
            goal: self.goal,
            status,
            auto_continue: self.auto_continue,
            max_rounds: self.max_rounds as i32,
            current_round: self.current_round as i32,
            budget_cap: self.budget_cap,
            actual_cost: self.actual_cost,
            expert_id: self.expert_id,
            created_at: self.created_at,
            phases,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateCampaign {
    pub id: Uuid,
    pub goal: String,
    pub status: CampaignStatus,
    pub auto_continue: bool,
    pub max_rounds: i32,
    pub budget_cap: Option<f64>,
    pub expert_id: Option<Uuid>,
    pub gap_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PhaseRow {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub phase_index: i64,
    pub status: String,
}

impl PhaseRow {
    pub fn status(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Ready)
    }

    pub fn into_dto(self, topics: Vec<Topic>) -> Phase {
        let status = self.status();
        Phase {
            id: self.id,
            campaign_id: self.campaign_id,
            phase_index: self.phase_index as i32,
            status,
            topics,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TopicRow {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub campaign_id: Uuid,
    pub prompt: String,
    pub depends_on: String,
    pub estimated_cost: f64,
    pub job_id: Option<Uuid>,
    pub context_summary: Option<String>,
    pub state: String,
    pub attempts: i64,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl TopicRow {
    pub fn state(&self) -> TopicState {
        self.state.parse().unwrap_or(TopicState::Planned)
    }

    pub fn depends_on_ids(&self) -> Vec<Uuid> {
        serde_json::from_str(&self.depends_on).unwrap_or_default()
    }

    pub fn into_dto(self) -> Topic {
        let state = self.state();
        let depends_on = self.depends_on_ids();
        Topic {
            id: self.id,
            phase_id: self.phase_id,
            prompt: self.prompt,
            depends_on,
            estimated_cost: self.estimated_cost,
            job_id: self.job_id,
            context_summary: self.context_summary,
            state,
            attempts: self.attempts as i32,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTopic {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub campaign_id: Uuid,
    pub prompt: String,
    pub depends_on: Vec<Uuid>,
    pub estimated_cost: f64,
}

// ============================================
// Expert models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ExpertRow {
    pub id: Uuid,
    pub name: String,
    pub domain_description: String,
    pub document_store_ref: Option<String>,
    pub total_spend: f64,
    pub last_synthesised_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExpertRow {
    pub fn into_dto(self) -> Expert {
        Expert {
            id: self.id,
            name: self.name,
            domain_description: self.domain_description,
            document_store_ref: self.document_store_ref,
            total_spend: self.total_spend,
            last_synthesised_at: self.last_synthesised_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BeliefRow {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub statement: String,
    pub confidence: f64,
    pub sources: String,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl BeliefRow {
    pub fn citations(&self) -> Vec<Citation> {
        serde_json::from_str(&self.sources).unwrap_or_default()
    }

    pub fn into_dto(self) -> Belief {
        let sources = self.citations();
        Belief {
            id: self.id,
            expert_id: self.expert_id,
            statement: self.statement,
            confidence: self.confidence,
            sources,
            superseded_by: self.superseded_by,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBelief {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub statement: String,
    pub confidence: f64,
    pub sources: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct GapRow {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub topic: String,
    pub priority: i64,
    pub discovered_at: DateTime<Utc>,
    pub filled_by_job: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
}

impl GapRow {
    pub fn into_dto(self) -> Gap {
        Gap {
            id: self.id,
            expert_id: self.expert_id,
            topic: self.topic,
            priority: self.priority as i32,
            discovered_at: self.discovered_at,
            filled_by_job: self.filled_by_job,
            campaign_id: self.campaign_id,
        }
    }
}

// ============================================
// Artifact models
// ============================================

/// Artifact reference row; the markdown bytes live on the blob path
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub hash: String,
    pub byte_len: i64,
    pub citations: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRow {
    pub fn citation_list(&self) -> Vec<Citation> {
        serde_json::from_str(&self.citations).unwrap_or_default()
    }
}

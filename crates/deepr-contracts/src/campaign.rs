// Campaign DTOs (multi-phase research plan)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Campaign status (phases mirror the same set)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Planning,
    Ready,
    Executing,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Planning => "planning",
            CampaignStatus::Ready => "ready",
            CampaignStatus::Executing => "executing",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(CampaignStatus::Planning),
            "ready" => Ok(CampaignStatus::Ready),
            "executing" => Ok(CampaignStatus::Executing),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(format!("unknown campaign status: {}", other)),
        }
    }
}

/// Where a planned topic is in its lifecycle
///
/// Terminal job outcomes are mirrored here so frontier selection never has
/// to join against the jobs table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TopicState {
    Planned,
    Dispatched,
    Completed,
    Failed,
}

impl TopicState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TopicState::Completed | TopicState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicState::Planned => "planned",
            TopicState::Dispatched => "dispatched",
            TopicState::Completed => "completed",
            TopicState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TopicState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(TopicState::Planned),
            "dispatched" => Ok(TopicState::Dispatched),
            "completed" => Ok(TopicState::Completed),
            "failed" => Ok(TopicState::Failed),
            other => Err(format!("unknown topic state: {}", other)),
        }
    }
}

/// Topic - a planned research task inside a phase; bound to at most one job
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Topic {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub prompt: String,
    /// Predecessor topics whose results feed this topic's context
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    pub state: TopicState,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Phase - a stage of a campaign
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Phase {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub phase_index: i32,
    pub status: CampaignStatus,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

/// Campaign - a multi-phase research plan
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub goal: String,
    pub status: CampaignStatus,
    pub auto_continue: bool,
    pub max_rounds: i32,
    pub current_round: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_cap: Option<f64>,
    pub actual_cost: f64,
    /// Set when a learning loop created this campaign for an expert's gap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expert_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips() {
        for status in [
            CampaignStatus::Planning,
            CampaignStatus::Ready,
            CampaignStatus::Executing,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            let parsed: CampaignStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(TopicState::Completed.is_terminal());
        assert!(!TopicState::Dispatched.is_terminal());
    }
}

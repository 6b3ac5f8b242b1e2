// Expert DTOs (persistent knowledge agent with beliefs and gaps)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Source span inside a research result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Citation {
    pub start: u32,
    pub end: u32,
    pub url: String,
    pub title: String,
}

/// Expert - a named, persistent knowledge agent
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Expert {
    pub id: Uuid,
    /// Human-readable unique name
    pub name: String,
    pub domain_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_store_ref: Option<String>,
    pub total_spend: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synthesised_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Belief - atomic statement held by an expert
///
/// Beliefs are append-only. Contradiction is expressed by a successor
/// belief linked through `superseded_by`, never by mutating the statement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Belief {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub statement: String,
    /// In [0, 1]; a revoked belief is a successor with confidence 0
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Gap - a known-unknown for an expert
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Gap {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub topic: String,
    pub priority: i32,
    pub discovered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_by_job: Option<Uuid>,
    /// Campaign currently researching this gap, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
}

/// Grounded answer returned by `query`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExpertAnswer {
    pub answer: String,
    /// Minimum of the retrieved beliefs' confidences
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub identified_gaps: Vec<String>,
}

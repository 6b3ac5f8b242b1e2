// Event payloads published on the in-process bus and pushed to subscribers
//
// Payloads are deltas, not full resources: a subscription update carries
// only what changed, so pushed frames stay far smaller than a polled GET.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::campaign::CampaignStatus;
use crate::job::{JobError, JobStatus};

/// Engine event, routed by `topic()`
///
/// Topic strings have the shape `jobs.{id}.{event}`, `campaigns.{id}.{event}`
/// or `experts.{name}.{event}`. Subscribing to a prefix (`jobs.{id}`)
/// receives every event below it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeeprEvent {
    JobStatusChanged {
        job_id: Uuid,
        status: JobStatus,
    },
    JobProgress {
        job_id: Uuid,
        progress_fraction: f64,
    },
    JobCompleted {
        job_id: Uuid,
        actual_cost: f64,
        result_ref: String,
    },
    JobFailed {
        job_id: Uuid,
        error: JobError,
    },
    JobStuck {
        job_id: Uuid,
        minutes_without_progress: i64,
    },
    CampaignStatusChanged {
        campaign_id: Uuid,
        status: CampaignStatus,
    },
    TopicDispatched {
        campaign_id: Uuid,
        topic_id: Uuid,
        job_id: Uuid,
    },
    TopicFinished {
        campaign_id: Uuid,
        topic_id: Uuid,
        completed: bool,
    },
    CampaignCompleted {
        campaign_id: Uuid,
        actual_cost: f64,
    },
    BeliefAdded {
        expert_name: String,
        belief_id: Uuid,
    },
    GapRecorded {
        expert_name: String,
        gap_id: Uuid,
        topic: String,
    },
    GapFilled {
        expert_name: String,
        gap_id: Uuid,
        job_id: Uuid,
    },
}

impl DeeprEvent {
    /// Routing topic for this event
    pub fn topic(&self) -> String {
        match self {
            DeeprEvent::JobStatusChanged { job_id, .. } => format!("jobs.{}.status", job_id),
            DeeprEvent::JobProgress { job_id, .. } => format!("jobs.{}.progress", job_id),
            DeeprEvent::JobCompleted { job_id, .. } => format!("jobs.{}.completed", job_id),
            DeeprEvent::JobFailed { job_id, .. } => format!("jobs.{}.failed", job_id),
            DeeprEvent::JobStuck { job_id, .. } => format!("jobs.{}.stuck", job_id),
            DeeprEvent::CampaignStatusChanged { campaign_id, .. } => {
                format!("campaigns.{}.status", campaign_id)
            }
            DeeprEvent::TopicDispatched { campaign_id, .. } => {
                format!("campaigns.{}.topic_dispatched", campaign_id)
            }
            DeeprEvent::TopicFinished { campaign_id, .. } => {
                format!("campaigns.{}.topic_finished", campaign_id)
            }
            DeeprEvent::CampaignCompleted { campaign_id, .. } => {
                format!("campaigns.{}.completed", campaign_id)
            }
            DeeprEvent::BeliefAdded { expert_name, .. } => {
                format!("experts.{}.belief_added", expert_name)
            }
            DeeprEvent::GapRecorded { expert_name, .. } => {
                format!("experts.{}.gap_recorded", expert_name)
            }
            DeeprEvent::GapFilled { expert_name, .. } => {
                format!("experts.{}.gap_filled", expert_name)
            }
        }
    }
}

/// Whether a subscription pattern covers a concrete topic
///
/// A pattern matches when its dot-separated segments are a prefix of the
/// topic's segments: `jobs.123` matches `jobs.123.completed` but not
/// `jobs.1234.completed`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut top = topic.split('.');
    loop {
        match (pat.next(), top.next()) {
            (None, _) => return true,
            (Some(_), None) => return false,
            (Some(p), Some(t)) if p != t => return false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_prefix_matching() {
        assert!(topic_matches("jobs.abc", "jobs.abc.completed"));
        assert!(topic_matches("jobs.abc.completed", "jobs.abc.completed"));
        assert!(!topic_matches("jobs.abc", "jobs.abcd.completed"));
        assert!(!topic_matches("jobs.abc.completed", "jobs.abc"));
        assert!(topic_matches("campaigns", "campaigns.x.status"));
    }

    #[test]
    fn event_topics_embed_entity_ids() {
        let id = Uuid::now_v7();
        let event = DeeprEvent::JobProgress {
            job_id: id,
            progress_fraction: 0.5,
        };
        assert_eq!(event.topic(), format!("jobs.{}.progress", id));
    }
}

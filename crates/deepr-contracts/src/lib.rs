// Shared DTOs for every Deepr entry point (HTTP, CLI, MCP)
// Note: request types live in deepr-api; these are the resource shapes

pub mod campaign;
pub mod common;
pub mod costs;
pub mod events;
pub mod expert;
pub mod job;

pub use campaign::{Campaign, CampaignStatus, Phase, Topic, TopicState};
pub use common::ErrorBody;
pub use costs::{
    AdmissionDecision, CostBreakdown, CostBucket, CostSummary, ElicitOption, SpendPeriod,
};
pub use events::DeeprEvent;
pub use expert::{Belief, Citation, Expert, ExpertAnswer, Gap};
pub use job::{ErrorKind, Job, JobError, JobStatus, ProviderKind, TokenUsage, ToolSpec};

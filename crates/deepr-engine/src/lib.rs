// Deepr orchestration engine
//
// The long-lived loops live here: job queue & state machine, background
// poller, campaign engine, expert store and the autonomous learning loop,
// plus the façade every entry point (HTTP, CLI, MCP) calls into.

pub mod campaign;
pub mod expert;
pub mod facade;
pub mod learning;
pub mod poller;
pub mod queue;
pub mod wait;

pub use campaign::{CampaignEngine, PlannedTopic};
pub use expert::ExpertStore;
pub use facade::Deepr;
pub use learning::{LearningLoop, LearningReport};
pub use poller::Poller;
pub use queue::{EnqueueOutcome, JobQueue, JobSpec};

// Deepr core services
//
// Database-free building blocks of the research engine:
// - Provider and DocumentStore ports with a capability table
// - Budget governor (admission gating, idempotent spend recording)
// - In-process event bus with prefix-matched topic subscriptions
// - Model allow-list and cost estimation
// - Summarisation for campaign context chaining
// - Clock abstraction so timeout logic is testable
//
// Key design decisions:
// - Ports are async traits; concrete provider SDKs live outside this repo
// - The governor is a process-scoped service behind explicit init/shutdown,
//   never ambient global state
// - In-memory fakes ship in this crate so tests and examples need no network

pub mod bus;
pub mod clock;
pub mod config;
pub mod docstore;
pub mod error;
pub mod governor;
pub mod memory;
pub mod pricing;
pub mod provider;
pub mod summarize;

pub use bus::EventBus;
pub use clock::{new_id, Clock, ManualClock, SystemClock};
pub use config::DeeprConfig;
pub use docstore::{Document, DocumentStore, SearchHit};
pub use error::{DeeprError, Result};
pub use governor::{BudgetGovernor, BudgetLimits, CostLedger, NewLedgerEntry};
pub use pricing::{estimate_job_cost, find_model, ModelProfile, KNOWN_MODELS};
pub use provider::{
    unsupported_tools, Provider, ProviderRegistry, RemotePoll, RemoteStatus, ResearchRequest,
    ResearchResult,
};
pub use summarize::{Summarizer, TruncationSummarizer};

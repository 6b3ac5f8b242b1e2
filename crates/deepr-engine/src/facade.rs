// API façade
//
// One uniform surface over the engine for every entry point (HTTP, CLI,
// MCP). Owns the wiring: storage, governor, bus, queue, poller, campaign
// engine, expert store and learning loop, with explicit init and shutdown.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use deepr_contracts::{
    Belief, Campaign, Citation, CostSummary, Expert, ExpertAnswer, Gap, Job, JobStatus,
    SpendPeriod,
};
use deepr_core::clock::Clock;
use deepr_core::config::DeeprConfig;
use deepr_core::docstore::{Document, DocumentStore};
use deepr_core::error::{DeeprError, Result};
use deepr_core::governor::{BudgetGovernor, BudgetLimits, CostLedger};
use deepr_core::provider::ProviderRegistry;
use deepr_core::summarize::Summarizer;
use deepr_core::EventBus;
use deepr_storage::{ArtifactStore, Database};

use crate::campaign::{CampaignEngine, CampaignSpec, CampaignWorkerHandle};
use crate::expert::ExpertStore;
use crate::learning::{LearningLoop, LearningReport};
use crate::poller::{Poller, PollerHandle};
use crate::queue::{EnqueueOutcome, JobQueue, JobSpec};

/// Process-scoped engine handle
pub struct Deepr {
    pub config: DeeprConfig,
    pub db: Database,
    pub artifacts: ArtifactStore,
    pub bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub governor: Arc<BudgetGovernor>,
    pub queue: Arc<JobQueue>,
    pub poller: Arc<Poller>,
    pub campaigns: Arc<CampaignEngine>,
    pub experts: Arc<ExpertStore>,
    pub learning: Arc<LearningLoop>,
    poller_handle: PollerHandle,
    campaign_handle: CampaignWorkerHandle,
}

impl Deepr {
    /// Wire the engine and start its background loops
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        config: DeeprConfig,
        db: Database,
        artifacts: ArtifactStore,
        providers: ProviderRegistry,
        docstore: Arc<dyn DocumentStore>,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let bus = EventBus::init();

        let ledger: Arc<dyn CostLedger> = Arc::new(db.clone());
        let governor = BudgetGovernor::init(
            BudgetLimits {
                daily: config.daily_budget,
                monthly: config.monthly_budget,
                ..BudgetLimits::default()
            },
            clock.clone(),
            ledger,
        )
        .await?;

        let queue = Arc::new(JobQueue::new(
            db.clone(),
            artifacts.clone(),
            governor.clone(),
            providers.clone(),
            docstore.clone(),
            bus.clone(),
            clock.clone(),
            config.clone(),
        ));

        let poller = Arc::new(Poller::new(
            db.clone(),
            queue.clone(),
            providers,
            bus.clone(),
            clock.clone(),
            config.clone(),
        ));

        let campaigns = Arc::new(CampaignEngine::new(
            db.clone(),
            queue.clone(),
            artifacts.clone(),
            summarizer,
            bus.clone(),
            clock.clone(),
            config.clone(),
        ));

        let experts = Arc::new(ExpertStore::new(
            db.clone(),
            docstore,
            queue.clone(),
            artifacts.clone(),
            bus.clone(),
            clock.clone(),
        ));

        let learning = Arc::new(LearningLoop::new(
            db.clone(),
            experts.clone(),
            campaigns.clone(),
            bus.clone(),
        ));

        let poller_handle = poller.spawn();
        let campaign_handle = campaigns.spawn().await;
        info!("Engine loops started");

        Ok(Arc::new(Self {
            config,
            db,
            artifacts,
            bus,
            clock,
            governor,
            queue,
            poller,
            campaigns,
            experts,
            learning,
            poller_handle,
            campaign_handle,
        }))
    }

    /// Stop background loops; durable state stays recoverable
    pub fn shutdown(&self) {
        self.poller_handle.shutdown();
        self.campaign_handle.shutdown();
        self.governor.shutdown();
        self.bus.shutdown();
        info!("Engine shut down");
    }

    // ============================================
    // Jobs
    // ============================================

    pub async fn create_job(&self, spec: JobSpec) -> Result<EnqueueOutcome> {
        self.queue.enqueue(spec).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.db
            .get_job(id)
            .await?
            .map(|row| row.into_dto())
            .ok_or(DeeprError::JobNotFound(id))
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        stuck_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        let rows = if stuck_only {
            let cutoff = self.clock.now()
                - chrono::Duration::from_std(self.config.stuck_threshold)
                    .expect("threshold in range");
            self.db.list_stuck_jobs(cutoff).await?
        } else {
            self.db
                .list_jobs(status.map(|s| s.as_str()), limit, offset)
                .await?
        };
        Ok(rows.into_iter().map(|row| row.into_dto()).collect())
    }

    pub async fn cancel_job(&self, id: Uuid) -> Result<Job> {
        self.queue.cancel(id).await
    }

    /// Markdown artifact and citations for a completed job
    pub async fn job_result(&self, id: Uuid) -> Result<(String, Vec<Citation>)> {
        let job = self.get_job(id).await?;
        let Some(result_ref) = &job.result_ref else {
            return Err(DeeprError::invalid_request(format!(
                "job {} has no result (status {})",
                id, job.status
            )));
        };

        let markdown = String::from_utf8_lossy(&self.artifacts.load(result_ref).await?).into_owned();
        let citations = self
            .db
            .get_artifact(result_ref)
            .await?
            .map(|artifact| artifact.citation_list())
            .unwrap_or_default();
        Ok((markdown, citations))
    }

    // ============================================
    // Costs
    // ============================================

    pub async fn costs(&self, period: SpendPeriod) -> Result<CostSummary> {
        self.governor.summary(period).await
    }

    // ============================================
    // Campaigns
    // ============================================

    pub async fn create_campaign(&self, spec: CampaignSpec) -> Result<Campaign> {
        self.campaigns.create(spec).await
    }

    pub async fn get_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.campaigns.get(id).await
    }

    pub async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        self.campaigns.list(limit, offset).await
    }

    pub async fn pause_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.campaigns.pause(id).await
    }

    pub async fn resume_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.campaigns.resume(id).await
    }

    pub async fn cancel_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.campaigns.cancel(id).await
    }

    // ============================================
    // Experts
    // ============================================

    pub async fn create_expert(
        &self,
        name: &str,
        domain_description: &str,
        initial_documents: Vec<Document>,
    ) -> Result<Expert> {
        self.experts
            .create(name, domain_description, initial_documents)
            .await
    }

    pub async fn get_expert(&self, name: &str) -> Result<Expert> {
        self.experts.get(name).await
    }

    pub async fn list_experts(&self) -> Result<Vec<Expert>> {
        self.experts.list().await
    }

    pub async fn expert_beliefs(&self, name: &str) -> Result<Vec<Belief>> {
        self.experts.beliefs(name).await
    }

    pub async fn expert_gaps(&self, name: &str) -> Result<Vec<Gap>> {
        self.experts.gaps(name).await
    }

    pub async fn upload_documents(&self, name: &str, documents: Vec<Document>) -> Result<()> {
        self.experts.upload(name, documents).await
    }

    pub async fn query_expert(&self, name: &str, question: &str) -> Result<ExpertAnswer> {
        self.experts.query(name, question).await
    }

    /// Schedule a synthesis pass over the expert's current corpus; returns
    /// the synthesis job id
    pub async fn synthesise_expert(&self, name: &str) -> Result<Uuid> {
        self.experts.synthesise(name).await
    }

    pub async fn record_gap(&self, name: &str, topic: &str, priority: i32) -> Result<Gap> {
        self.experts.record_gap(name, topic, priority).await
    }

    pub async fn fill_gap(&self, name: &str, gap_id: Uuid, budget: Option<f64>) -> Result<Uuid> {
        self.learning.fill_gap(name, gap_id, budget).await
    }

    /// Run the autonomous loop to completion
    pub async fn learn(&self, name: &str, budget: f64, top_k: usize) -> Result<LearningReport> {
        self.learning.run(name, budget, top_k).await
    }

    /// Cancel an expert's learning loop, including its active campaign
    pub async fn cancel_learning(&self, name: &str) -> Result<()> {
        self.learning.cancel(name).await
    }
}

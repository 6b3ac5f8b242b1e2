// Campaign engine
//
// Multi-phase research plans over the job queue. The engine owns campaign,
// phase and topic rows; it never mutates a job directly, it enqueues new
// jobs and observes their terminal events on the bus.

pub mod dag;
pub mod planner;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deepr_contracts::{
    Campaign, CampaignStatus, DeeprEvent, ErrorKind, JobStatus, TopicState,
};
use deepr_core::clock::{new_id, Clock};
use deepr_core::config::{DeeprConfig, MAX_ROUNDS_CEILING};
use deepr_core::error::{DeeprError, Result};
use deepr_core::pricing::{estimate_job_cost, find_model};
use deepr_core::summarize::Summarizer;
use deepr_core::EventBus;
use deepr_storage::{
    ArtifactStore, CampaignRow, CreateCampaign, CreateTopic, Database, TopicRow,
};

use crate::queue::{EnqueueOutcome, JobQueue, JobSpec, DEFAULT_MODEL};

pub use planner::TopicDraft;

/// Topic supplied by the caller of a planned campaign; dependencies are
/// 0-based indices into the same list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTopic {
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// Request to create a campaign
#[derive(Debug, Clone, Default)]
pub struct CampaignSpec {
    pub goal: String,
    /// `Some` creates a planned campaign; `None` asks the planner model
    pub topics: Option<Vec<PlannedTopic>>,
    pub auto_continue: bool,
    pub max_rounds: Option<i32>,
    pub budget_cap: Option<f64>,
    pub expert_id: Option<Uuid>,
    pub gap_id: Option<Uuid>,
}

pub struct CampaignEngine {
    db: Database,
    queue: Arc<JobQueue>,
    artifacts: ArtifactStore,
    summarizer: Arc<dyn Summarizer>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: DeeprConfig,
    step_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Handle to the running campaign worker (event router + stepper)
pub struct CampaignWorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CampaignWorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

impl CampaignEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        queue: Arc<JobQueue>,
        artifacts: ArtifactStore,
        summarizer: Arc<dyn Summarizer>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: DeeprConfig,
    ) -> Self {
        Self {
            db,
            queue,
            artifacts,
            summarizer,
            bus,
            clock,
            config,
            step_locks: Mutex::new(HashMap::new()),
        }
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Create a campaign; planned campaigns start executing immediately,
    /// auto campaigns first run a planning job
    pub async fn create(&self, spec: CampaignSpec) -> Result<Campaign> {
        if spec.goal.trim().is_empty() {
            return Err(DeeprError::invalid_request("campaign goal is empty"));
        }

        let max_rounds = spec
            .max_rounds
            .unwrap_or(self.config.max_rounds)
            .clamp(1, MAX_ROUNDS_CEILING);

        let planned = spec.topics.is_some();
        let campaign = self
            .db
            .create_campaign(CreateCampaign {
                id: new_id(),
                goal: spec.goal.clone(),
                status: if planned {
                    CampaignStatus::Ready
                } else {
                    CampaignStatus::Planning
                },
                auto_continue: spec.auto_continue,
                max_rounds,
                budget_cap: spec.budget_cap,
                expert_id: spec.expert_id,
                gap_id: spec.gap_id,
                created_at: self.clock.now(),
            })
            .await?;

        match spec.topics {
            Some(topics) => {
                let drafts: Vec<TopicDraft> = topics
                    .into_iter()
                    .map(|t| TopicDraft {
                        prompt: t.prompt,
                        depends_on: t.depends_on,
                    })
                    .collect();
                self.add_phase(&campaign, &drafts).await?;
                self.db
                    .update_campaign_status(
                        campaign.id,
                        CampaignStatus::Ready,
                        CampaignStatus::Executing,
                    )
                    .await?;
                self.publish_status(campaign.id, CampaignStatus::Executing);
                info!(campaign_id = %campaign.id, "Planned campaign executing");
                self.step(campaign.id).await?;
            }
            None => {
                self.enqueue_planner(&campaign, None).await?;
            }
        }

        self.get(campaign.id).await
    }

    /// Campaign with phases and topics attached
    pub async fn get(&self, id: Uuid) -> Result<Campaign> {
        let row = self
            .db
            .get_campaign(id)
            .await?
            .ok_or(DeeprError::CampaignNotFound(id))?;

        let phases = self.db.list_phases(id).await?;
        let topics = self.db.list_topics_by_campaign(id).await?;

        let mut by_phase: HashMap<Uuid, Vec<deepr_contracts::Topic>> = HashMap::new();
        for topic in topics {
            by_phase
                .entry(topic.phase_id)
                .or_default()
                .push(topic.into_dto());
        }

        let phases = phases
            .into_iter()
            .map(|phase| {
                let topics = by_phase.remove(&phase.id).unwrap_or_default();
                phase.into_dto(topics)
            })
            .collect();

        Ok(row.into_dto(phases))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>> {
        let rows = self.db.list_campaigns(limit, offset).await?;
        let mut campaigns = Vec::with_capacity(rows.len());
        for row in rows {
            campaigns.push(self.get(row.id).await?);
        }
        Ok(campaigns)
    }

    /// Pause an executing campaign: in-flight jobs run to completion, no
    /// new frontier topics are enqueued. Durable.
    pub async fn pause(&self, id: Uuid) -> Result<Campaign> {
        let updated = self
            .db
            .update_campaign_status(id, CampaignStatus::Executing, CampaignStatus::Paused)
            .await?;

        match updated {
            Some(_) => {
                info!(campaign_id = %id, "Campaign paused");
                self.publish_status(id, CampaignStatus::Paused);
                self.get(id).await
            }
            None => {
                let row = self
                    .db
                    .get_campaign(id)
                    .await?
                    .ok_or(DeeprError::CampaignNotFound(id))?;
                Err(DeeprError::PauseNotApplicable(format!(
                    "campaign is {}",
                    row.status()
                )))
            }
        }
    }

    /// Resume a paused campaign and re-run frontier selection
    pub async fn resume(&self, id: Uuid) -> Result<Campaign> {
        let updated = self
            .db
            .update_campaign_status(id, CampaignStatus::Paused, CampaignStatus::Executing)
            .await?;

        match updated {
            Some(_) => {
                info!(campaign_id = %id, "Campaign resumed");
                self.publish_status(id, CampaignStatus::Executing);
                self.step(id).await?;
                self.get(id).await
            }
            None => {
                let row = self
                    .db
                    .get_campaign(id)
                    .await?
                    .ok_or(DeeprError::CampaignNotFound(id))?;
                Err(DeeprError::PauseNotApplicable(format!(
                    "campaign is {}",
                    row.status()
                )))
            }
        }
    }

    /// Cancel a campaign: every non-terminal topic job is cancelled and the
    /// campaign is closed as failed
    pub async fn cancel(&self, id: Uuid) -> Result<Campaign> {
        let row = self
            .db
            .get_campaign(id)
            .await?
            .ok_or(DeeprError::CampaignNotFound(id))?;
        if row.status().is_terminal() {
            return Err(DeeprError::AlreadyTerminal(id));
        }

        for topic in self.db.list_topics_by_campaign(id).await? {
            if let Some(job_id) = topic.job_id {
                match self.queue.cancel(job_id).await {
                    Ok(_) | Err(DeeprError::AlreadyTerminal(_)) => {}
                    Err(err) => {
                        warn!(campaign_id = %id, job_id = %job_id, error = %err, "Topic cancel failed")
                    }
                }
            }
            if !topic.state().is_terminal() {
                self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
            }
        }

        self.db.set_campaign_status(id, CampaignStatus::Failed).await?;
        self.publish_status(id, CampaignStatus::Failed);
        self.get(id).await
    }

    // ============================================
    // Execution
    // ============================================

    /// Frontier selection and dispatch for one campaign
    ///
    /// Safe to call from the stepper tick and from event handlers; a
    /// per-campaign lock prevents double dispatch.
    pub async fn step(&self, id: Uuid) -> Result<()> {
        let lock = {
            let mut locks = self.step_locks.lock().await;
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let campaign = self
            .db
            .get_campaign(id)
            .await?
            .ok_or(DeeprError::CampaignNotFound(id))?;
        if campaign.status() != CampaignStatus::Executing {
            return Ok(());
        }

        let mut topics = self.db.list_topics_by_campaign(id).await?;
        if topics.is_empty() {
            // Planner round still outstanding
            return Ok(());
        }

        // Campaign budget check before any new dispatch
        if let Some(cap) = campaign.budget_cap {
            let spent = self.db.recompute_campaign_cost(id).await?;
            if spent >= cap {
                warn!(campaign_id = %id, spent, cap, "Campaign budget exhausted, pausing");
                self.db
                    .update_campaign_status(id, CampaignStatus::Executing, CampaignStatus::Paused)
                    .await?;
                self.publish_status(id, CampaignStatus::Paused);
                return Ok(());
            }
        }

        // Reconcile dispatched topics whose job reached a terminal state
        // without a delivered event (inline submit failures, crash recovery)
        let mut reconciled = false;
        for topic in &topics {
            if topic.state() != TopicState::Dispatched {
                continue;
            }
            let Some(job_id) = topic.job_id else { continue };
            let Some(job) = self.db.get_job(job_id).await? else {
                continue;
            };
            match job.status() {
                JobStatus::Completed => {
                    self.db
                        .mark_topic_state(topic.id, TopicState::Completed)
                        .await?;
                    reconciled = true;
                }
                JobStatus::Failed => {
                    let kind = job
                        .job_error()
                        .map(|e| e.kind)
                        .unwrap_or(ErrorKind::InvalidRequest);
                    self.on_topic_failed(topic.clone(), kind).await?;
                    reconciled = true;
                }
                JobStatus::Cancelled | JobStatus::AdmissionRejected => {
                    self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
                    reconciled = true;
                }
                _ => {}
            }
        }
        if reconciled {
            topics = self.db.list_topics_by_campaign(id).await?;
        }

        // Topics behind a permanently failed prerequisite can never run
        let doomed = dag::doomed_topics(&topics);
        for topic in &topics {
            if topic.state() == TopicState::Planned && doomed.contains(&topic.id) {
                debug!(campaign_id = %id, topic_id = %topic.id, "Topic doomed by failed dependency");
                self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
                self.bus.publish(DeeprEvent::TopicFinished {
                    campaign_id: id,
                    topic_id: topic.id,
                    completed: false,
                });
            }
        }
        if !doomed.is_empty() {
            topics = self.db.list_topics_by_campaign(id).await?;
        }

        if topics.iter().all(|t| t.state().is_terminal()) {
            return self.finish_round(&campaign, &topics).await;
        }

        let inflight = topics
            .iter()
            .filter(|t| t.state() == TopicState::Dispatched)
            .count();
        let capacity = self
            .config
            .max_parallel_per_campaign
            .saturating_sub(inflight);
        if capacity == 0 {
            return Ok(());
        }

        let now = self.clock.now();
        let completed: std::collections::HashSet<Uuid> = topics
            .iter()
            .filter(|t| t.state() == TopicState::Completed)
            .map(|t| t.id)
            .collect();
        let by_id: HashMap<Uuid, TopicRow> =
            topics.iter().map(|t| (t.id, t.clone())).collect();

        let frontier: Vec<TopicRow> = topics
            .iter()
            .filter(|t| {
                t.state() == TopicState::Planned
                    && t.next_attempt_at.map(|at| at <= now).unwrap_or(true)
                    && t.depends_on_ids().iter().all(|dep| completed.contains(dep))
            })
            .take(capacity)
            .cloned()
            .collect();

        for topic in frontier {
            let context = self.build_context(&topic, &by_id).await?;
            let prompt = match &context {
                Some(summary) => format!(
                    "{}\n\n## Context from earlier research\n\n{}",
                    topic.prompt, summary
                ),
                None => topic.prompt.clone(),
            };

            let outcome = self
                .queue
                .enqueue(JobSpec {
                    prompt,
                    parent_topic_id: Some(topic.id),
                    ..JobSpec::default()
                })
                .await?;

            match outcome {
                EnqueueOutcome::Accepted(job) => {
                    self.db
                        .mark_topic_dispatched(
                            topic.id,
                            job.id,
                            context.as_deref(),
                            topic.attempts as i32 + 1,
                        )
                        .await?;
                    self.bus.publish(DeeprEvent::TopicDispatched {
                        campaign_id: id,
                        topic_id: topic.id,
                        job_id: job.id,
                    });
                    // A submit can fail inline, before the topic was bound
                    // to the job id; that event fired too early to be
                    // routed, and the reconciliation pass above picks the
                    // failure up on the next step
                }
                EnqueueOutcome::Elicitation { .. } => {
                    // No budget headroom for new topics; pause rather than
                    // burn the remaining budget half way through a phase
                    warn!(campaign_id = %id, topic_id = %topic.id, "Budget elicitation, pausing campaign");
                    self.db
                        .update_campaign_status(
                            id,
                            CampaignStatus::Executing,
                            CampaignStatus::Paused,
                        )
                        .await?;
                    self.publish_status(id, CampaignStatus::Paused);
                    return Ok(());
                }
                EnqueueOutcome::Rejected(job) => {
                    warn!(campaign_id = %id, topic_id = %topic.id, job_id = %job.id, "Topic rejected at admission");
                    self.db
                        .mark_topic_dispatched(topic.id, job.id, None, topic.attempts as i32 + 1)
                        .await?;
                    self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
                    self.bus.publish(DeeprEvent::TopicFinished {
                        campaign_id: id,
                        topic_id: topic.id,
                        completed: false,
                    });
                }
            }
        }

        Ok(())
    }

    /// All topics terminal: close the phase, then either re-plan or finish
    async fn finish_round(&self, campaign: &CampaignRow, topics: &[TopicRow]) -> Result<()> {
        for phase in self.db.list_phases(campaign.id).await? {
            if phase.status() != CampaignStatus::Completed {
                self.db
                    .set_phase_status(phase.id, CampaignStatus::Completed)
                    .await?;
            }
        }
        let actual_cost = self.db.recompute_campaign_cost(campaign.id).await?;

        let sinks = dag::sink_topics(topics);
        let goal_reached = sinks.iter().any(|sink| {
            topics
                .iter()
                .any(|t| t.id == *sink && t.state() == TopicState::Completed)
        });

        if !goal_reached {
            warn!(campaign_id = %campaign.id, "Every path to the goal failed");
            self.db
                .set_campaign_status(campaign.id, CampaignStatus::Failed)
                .await?;
            self.publish_status(campaign.id, CampaignStatus::Failed);
            return Ok(());
        }

        let rounds_allowed = campaign.max_rounds.min(MAX_ROUNDS_CEILING as i64);
        if campaign.auto_continue && campaign.current_round + 1 < rounds_allowed {
            let results = self.collect_results(topics).await?;
            let summary = self
                .summarizer
                .summarise(&results, self.config.context_token_budget)
                .await?;
            self.db.increment_campaign_round(campaign.id).await?;
            self.enqueue_planner(campaign, Some(&summary)).await?;
            return Ok(());
        }

        self.db
            .set_campaign_status(campaign.id, CampaignStatus::Completed)
            .await?;
        info!(campaign_id = %campaign.id, actual_cost, "Campaign completed");
        self.publish_status(campaign.id, CampaignStatus::Completed);
        self.bus.publish(DeeprEvent::CampaignCompleted {
            campaign_id: campaign.id,
            actual_cost,
        });
        Ok(())
    }

    // ============================================
    // Event handling
    // ============================================

    /// Route a job event to the owning campaign
    pub async fn handle_job_event(&self, event: &DeeprEvent) -> Result<()> {
        match event {
            DeeprEvent::JobCompleted { job_id, .. } => {
                if let Some(campaign) = self.db.get_campaign_by_planner_job(*job_id).await? {
                    return self.on_planner_done(campaign, *job_id).await;
                }
                if let Some(topic) = self.db.get_topic_by_job(*job_id).await? {
                    self.db
                        .mark_topic_state(topic.id, TopicState::Completed)
                        .await?;
                    self.db.recompute_campaign_cost(topic.campaign_id).await?;
                    self.bus.publish(DeeprEvent::TopicFinished {
                        campaign_id: topic.campaign_id,
                        topic_id: topic.id,
                        completed: true,
                    });
                    self.step(topic.campaign_id).await?;
                }
            }
            DeeprEvent::JobFailed { job_id, error } => {
                if let Some(campaign) = self.db.get_campaign_by_planner_job(*job_id).await? {
                    warn!(campaign_id = %campaign.id, kind = ?error.kind, "Planner job failed");
                    self.db
                        .set_campaign_status(campaign.id, CampaignStatus::Failed)
                        .await?;
                    self.publish_status(campaign.id, CampaignStatus::Failed);
                    return Ok(());
                }
                if let Some(topic) = self.db.get_topic_by_job(*job_id).await? {
                    let campaign_id = topic.campaign_id;
                    self.on_topic_failed(topic, error.kind).await?;
                    self.step(campaign_id).await?;
                }
            }
            DeeprEvent::JobStatusChanged {
                job_id,
                status: JobStatus::Cancelled,
            } => {
                if let Some(topic) = self.db.get_topic_by_job(*job_id).await? {
                    self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
                    self.bus.publish(DeeprEvent::TopicFinished {
                        campaign_id: topic.campaign_id,
                        topic_id: topic.id,
                        completed: false,
                    });
                    self.step(topic.campaign_id).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a topic failure: schedule a backed-off retry for retryable
    /// kinds, otherwise fail the topic. The caller re-steps the campaign;
    /// this method must stay step-free because step itself calls it.
    async fn on_topic_failed(&self, topic: TopicRow, kind: ErrorKind) -> Result<()> {
        let attempts = topic.attempts as i32;
        if kind.is_retryable() && attempts < self.config.max_topic_attempts {
            let backoff_ms = self.config.retry_base.as_millis() as u64
                * u64::from(self.config.retry_factor).pow(attempts.saturating_sub(1) as u32);
            let next_attempt_at =
                self.clock.now() + chrono::Duration::milliseconds(backoff_ms as i64);
            info!(
                topic_id = %topic.id,
                attempts,
                backoff_ms,
                "Retryable topic failure, backing off"
            );
            self.db
                .schedule_topic_retry(topic.id, attempts, next_attempt_at)
                .await?;
        } else {
            self.db.mark_topic_state(topic.id, TopicState::Failed).await?;
            self.bus.publish(DeeprEvent::TopicFinished {
                campaign_id: topic.campaign_id,
                topic_id: topic.id,
                completed: false,
            });
        }
        Ok(())
    }

    async fn on_planner_done(&self, campaign: CampaignRow, job_id: Uuid) -> Result<()> {
        let job = self
            .db
            .get_job(job_id)
            .await?
            .ok_or(DeeprError::JobNotFound(job_id))?;
        let Some(result_ref) = &job.result_ref else {
            return Err(DeeprError::Storage(anyhow::anyhow!(
                "planner job {} completed without a result",
                job_id
            )));
        };

        let markdown = String::from_utf8_lossy(&self.artifacts.load(result_ref).await?).into_owned();
        let drafts = match planner::parse_plan(&markdown) {
            Ok(drafts) => drafts,
            Err(err) => {
                warn!(campaign_id = %campaign.id, error = %err, "Planner output unusable");
                self.db
                    .set_campaign_status(campaign.id, CampaignStatus::Failed)
                    .await?;
                self.publish_status(campaign.id, CampaignStatus::Failed);
                return Ok(());
            }
        };

        self.add_phase(&campaign, &drafts).await?;

        if campaign.status() == CampaignStatus::Planning {
            self.db
                .update_campaign_status(
                    campaign.id,
                    CampaignStatus::Planning,
                    CampaignStatus::Executing,
                )
                .await?;
            self.publish_status(campaign.id, CampaignStatus::Executing);
        }
        info!(campaign_id = %campaign.id, topics = drafts.len(), "Plan accepted");

        self.step(campaign.id).await
    }

    // ============================================
    // Internals
    // ============================================

    async fn add_phase(&self, campaign: &CampaignRow, drafts: &[TopicDraft]) -> Result<()> {
        if drafts.is_empty() {
            return Err(DeeprError::invalid_request("phase has no topics"));
        }

        let edges: HashMap<usize, Vec<usize>> = drafts
            .iter()
            .enumerate()
            .map(|(index, draft)| (index, draft.depends_on.clone()))
            .collect();
        for (index, draft) in drafts.iter().enumerate() {
            if draft.depends_on.iter().any(|dep| *dep >= drafts.len()) {
                return Err(DeeprError::invalid_request(format!(
                    "topic {} depends on a nonexistent topic",
                    index + 1
                )));
            }
        }
        if dag::has_cycle(&edges) {
            return Err(DeeprError::invalid_request(
                "topic dependencies contain a cycle",
            ));
        }

        let phase_index = self.db.list_phases(campaign.id).await?.len() as i32;
        let phase = self
            .db
            .create_phase(new_id(), campaign.id, phase_index)
            .await?;

        let profile = find_model(DEFAULT_MODEL).expect("default model is registered");
        let ids: Vec<Uuid> = drafts.iter().map(|_| new_id()).collect();
        for (index, draft) in drafts.iter().enumerate() {
            let depends_on = draft.depends_on.iter().map(|dep| ids[*dep]).collect();
            self.db
                .create_topic(CreateTopic {
                    id: ids[index],
                    phase_id: phase.id,
                    campaign_id: campaign.id,
                    prompt: draft.prompt.clone(),
                    depends_on,
                    estimated_cost: estimate_job_cost(profile, draft.prompt.chars().count()),
                })
                .await?;
        }

        Ok(())
    }

    async fn enqueue_planner(
        &self,
        campaign: &CampaignRow,
        results_so_far: Option<&str>,
    ) -> Result<()> {
        let outcome = self
            .queue
            .enqueue(JobSpec {
                prompt: planner::planner_prompt(&campaign.goal, results_so_far),
                model: Some("planner".to_string()),
                priority: Some(4),
                ..JobSpec::default()
            })
            .await?;

        match outcome {
            EnqueueOutcome::Accepted(job) => {
                self.db.set_campaign_planner_job(campaign.id, job.id).await?;
                debug!(campaign_id = %campaign.id, job_id = %job.id, "Planner job dispatched");
                Ok(())
            }
            EnqueueOutcome::Elicitation { .. } | EnqueueOutcome::Rejected(_) => {
                warn!(campaign_id = %campaign.id, "No budget for planning, campaign failed");
                self.db
                    .set_campaign_status(campaign.id, CampaignStatus::Failed)
                    .await?;
                self.publish_status(campaign.id, CampaignStatus::Failed);
                Ok(())
            }
        }
    }

    /// Summarised results of a topic's completed prerequisites
    async fn build_context(
        &self,
        topic: &TopicRow,
        by_id: &HashMap<Uuid, TopicRow>,
    ) -> Result<Option<String>> {
        let mut collected = String::new();
        for dep in topic.depends_on_ids() {
            let Some(dep_topic) = by_id.get(&dep) else { continue };
            if dep_topic.state() != TopicState::Completed {
                continue;
            }
            if let Some(markdown) = self.topic_result(dep_topic).await? {
                collected.push_str(&format!("## {}\n\n{}\n\n", dep_topic.prompt, markdown));
            }
        }

        if collected.is_empty() {
            return Ok(None);
        }
        let summary = self
            .summarizer
            .summarise(&collected, self.config.context_token_budget)
            .await?;
        Ok(Some(summary))
    }

    async fn collect_results(&self, topics: &[TopicRow]) -> Result<String> {
        let mut collected = String::new();
        for topic in topics {
            if topic.state() != TopicState::Completed {
                continue;
            }
            if let Some(markdown) = self.topic_result(topic).await? {
                collected.push_str(&format!("## {}\n\n{}\n\n", topic.prompt, markdown));
            }
        }
        Ok(collected)
    }

    async fn topic_result(&self, topic: &TopicRow) -> Result<Option<String>> {
        let Some(job_id) = topic.job_id else {
            return Ok(None);
        };
        let Some(job) = self.db.get_job(job_id).await? else {
            return Ok(None);
        };
        let Some(result_ref) = &job.result_ref else {
            return Ok(None);
        };
        let bytes = self.artifacts.load(result_ref).await?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// The completed job backing the campaign's goal topic, if any
    pub async fn goal_result_job(&self, campaign_id: Uuid) -> Result<Option<deepr_storage::JobRow>> {
        let topics = self.db.list_topics_by_campaign(campaign_id).await?;
        for sink in dag::sink_topics(&topics) {
            let Some(topic) = topics.iter().find(|t| t.id == sink) else {
                continue;
            };
            if topic.state() != TopicState::Completed {
                continue;
            }
            if let Some(job_id) = topic.job_id {
                if let Some(job) = self.db.get_job(job_id).await? {
                    if job.status() == JobStatus::Completed {
                        return Ok(Some(job));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn step_active(&self) -> Result<()> {
        for row in self.db.list_campaigns(500, 0).await? {
            if row.status() == CampaignStatus::Executing {
                if let Err(err) = self.step(row.id).await {
                    error!(campaign_id = %row.id, error = %err, "Campaign step failed");
                }
            }
        }
        Ok(())
    }

    fn publish_status(&self, campaign_id: Uuid, status: CampaignStatus) {
        self.bus.publish(DeeprEvent::CampaignStatusChanged {
            campaign_id,
            status,
        });
    }

    /// Start the worker draining job events and ticking due retries
    pub async fn spawn(self: &Arc<Self>) -> CampaignWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let mut events = self.bus.subscribe("jobs").await;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.campaign_step_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Campaign worker shutting down");
                        break;
                    }
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if let Err(err) = engine.handle_job_event(&event).await {
                            error!(error = %err, "Campaign event handling failed");
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = engine.step_active().await {
                            error!(error = %err, "Campaign stepper pass failed");
                        }
                    }
                }
            }
        });

        CampaignWorkerHandle {
            shutdown_tx,
            handle,
        }
    }
}

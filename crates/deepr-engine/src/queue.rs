// Job queue and state machine
//
// Owns every job transition. Writers go through status-guarded updates in
// storage; a per-job mutex serialises competing transitions (submit ack vs
// cancel) without ever being held across a provider call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use deepr_contracts::{
    AdmissionDecision, DeeprEvent, ElicitOption, ErrorKind, Job, JobError, JobStatus, ProviderKind,
    ToolSpec,
};
use deepr_core::clock::{new_id, Clock};
use deepr_core::config::DeeprConfig;
use deepr_core::docstore::DocumentStore;
use deepr_core::error::{DeeprError, Result};
use deepr_core::governor::BudgetGovernor;
use deepr_core::pricing::{estimate_job_cost, find_model};
use deepr_core::provider::{supports_tool, ProviderRegistry, ResearchRequest, ResearchResult};
use deepr_core::EventBus;
use deepr_storage::{ArtifactStore, CreateJob, Database, JobRow, JobTransition};

pub const MAX_PROMPT_CHARS: usize = 10_000;
pub const MAX_METADATA_BYTES: usize = 4_096;
pub const DEFAULT_MODEL: &str = "standard";

/// Request to create a job
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    pub tools: Vec<ToolSpec>,
    pub vector_store_ref: Option<String>,
    pub budget_cap: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub priority: Option<u8>,
    pub parent_topic_id: Option<Uuid>,
    /// Caller answered a previous elicitation with APPROVE_OVERRIDE
    pub override_approved: bool,
}

/// What `enqueue` produced
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// Job persisted and dispatched (or queued behind the inflight limit)
    Accepted(Job),
    /// Budget question for the caller; no job row was created
    Elicitation {
        estimated_cost: f64,
        budget_cap: f64,
        options: Vec<ElicitOption>,
    },
    /// Admission refused; the rejection is recorded as a terminal job row
    Rejected(Job),
}

pub struct JobQueue {
    db: Database,
    artifacts: ArtifactStore,
    governor: Arc<BudgetGovernor>,
    providers: ProviderRegistry,
    docstore: Arc<dyn DocumentStore>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: DeeprConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl JobQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        artifacts: ArtifactStore,
        governor: Arc<BudgetGovernor>,
        providers: ProviderRegistry,
        docstore: Arc<dyn DocumentStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: DeeprConfig,
    ) -> Self {
        Self {
            db,
            artifacts,
            governor,
            providers,
            docstore,
            bus,
            clock,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    // ============================================
    // Admission
    // ============================================

    /// Validate, gate through the budget governor, persist and dispatch
    pub async fn enqueue(&self, spec: JobSpec) -> Result<EnqueueOutcome> {
        let (model, provider) = self.validate(&spec)?;
        let profile = find_model(&model).expect("validated model exists");
        let estimated_cost = estimate_job_cost(profile, spec.prompt.chars().count());

        let decision = self
            .governor
            .check_admission(estimated_cost, spec.budget_cap, spec.override_approved)
            .await?;

        match decision {
            AdmissionDecision::Elicit {
                estimated_cost,
                budget_cap,
                options,
            } => Ok(EnqueueOutcome::Elicitation {
                estimated_cost,
                budget_cap,
                options,
            }),
            AdmissionDecision::Reject { reason } => {
                let row = self
                    .persist_job(&spec, &model, provider, estimated_cost)
                    .await?;
                let rejected = self
                    .db
                    .update_job(
                        row.id,
                        JobStatus::Pending,
                        JobTransition {
                            status: Some(JobStatus::AdmissionRejected),
                            error: Some(JobError::new(ErrorKind::BudgetExceeded, reason.as_str())),
                            ..Default::default()
                        },
                    )
                    .await?
                    .unwrap_or(row);
                info!(job_id = %rejected.id, reason = %reason, "Job rejected at admission");
                self.publish_status(&rejected);
                Ok(EnqueueOutcome::Rejected(rejected.into_dto()))
            }
            AdmissionDecision::Admit { .. } => {
                let row = self
                    .persist_job(&spec, &model, provider, estimated_cost)
                    .await?;
                debug!(job_id = %row.id, model = %model, "Job admitted");
                let row = self.try_dispatch(row).await?;
                Ok(EnqueueOutcome::Accepted(row.into_dto()))
            }
        }
    }

    fn validate(&self, spec: &JobSpec) -> Result<(String, ProviderKind)> {
        let prompt_chars = spec.prompt.chars().count();
        if prompt_chars == 0 {
            return Err(DeeprError::InvalidPrompt("prompt is empty".into()));
        }
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(DeeprError::InvalidPrompt(format!(
                "prompt is {} chars, limit is {}",
                prompt_chars, MAX_PROMPT_CHARS
            )));
        }

        if let Some(priority) = spec.priority {
            if !(1..=5).contains(&priority) {
                return Err(DeeprError::invalid_request("priority must be 1..=5"));
            }
        }

        if let Some(metadata) = &spec.metadata {
            let bytes = serde_json::to_vec(metadata).map_err(anyhow::Error::from)?;
            if bytes.len() > MAX_METADATA_BYTES {
                return Err(DeeprError::invalid_request(format!(
                    "metadata is {} bytes, limit is {}",
                    bytes.len(),
                    MAX_METADATA_BYTES
                )));
            }
        }

        if let Some(cap) = spec.budget_cap {
            if cap <= 0.0 {
                return Err(DeeprError::BudgetTooLow("budget_cap must be positive".into()));
            }
        }

        let model = spec.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let profile = find_model(&model).ok_or_else(|| DeeprError::UnknownModel(model.clone()))?;

        let provider = spec.provider.unwrap_or(profile.provider);
        if provider != profile.provider {
            return Err(DeeprError::invalid_request(format!(
                "model {} belongs to provider {}",
                profile.name, profile.provider
            )));
        }
        // Fails early when the provider is not configured
        self.providers.get(provider)?;

        for tool in &spec.tools {
            if !supports_tool(provider, tool) && tool.name() != "file_search" {
                return Err(DeeprError::invalid_request(format!(
                    "provider {} does not support tool {}",
                    provider,
                    tool.name()
                )));
            }
        }

        Ok((profile.name.to_string(), provider))
    }

    async fn persist_job(
        &self,
        spec: &JobSpec,
        model: &str,
        provider: ProviderKind,
        estimated_cost: f64,
    ) -> Result<JobRow> {
        let row = self
            .db
            .create_job(CreateJob {
                id: new_id(),
                prompt: spec.prompt.clone(),
                model: model.to_string(),
                provider,
                tools: spec.tools.clone(),
                vector_store_ref: spec.vector_store_ref.clone(),
                budget_cap: spec.budget_cap,
                metadata: spec.metadata.clone(),
                priority: spec.priority.unwrap_or(3),
                parent_topic_id: spec.parent_topic_id,
                estimated_cost,
                override_approved: spec.override_approved,
                created_at: self.clock.now(),
            })
            .await?;
        Ok(row)
    }

    // ============================================
    // Dispatch
    // ============================================

    /// Submit the job now unless the global inflight limit is reached, in
    /// which case it stays `pending` and the next poller tick drains it
    async fn try_dispatch(&self, row: JobRow) -> Result<JobRow> {
        let inflight = self.db.count_inflight_jobs().await?;
        if inflight >= self.config.max_inflight_jobs as i64 {
            debug!(job_id = %row.id, inflight, "Inflight limit reached, job queued");
            return Ok(row);
        }
        self.submit_job(row).await
    }

    /// Dispatch queued pending jobs up to the inflight limit
    pub async fn dispatch_pending(&self) -> Result<()> {
        let mut inflight = self.db.count_inflight_jobs().await?;
        if inflight >= self.config.max_inflight_jobs as i64 {
            return Ok(());
        }

        for row in self.db.list_pending_jobs().await? {
            if inflight >= self.config.max_inflight_jobs as i64 {
                break;
            }
            let submitted = self.submit_job(row).await?;
            if !submitted.status().is_terminal() {
                inflight += 1;
            }
        }
        Ok(())
    }

    /// Drive one job pending -> submitting -> processing (or a failure state)
    async fn submit_job(&self, row: JobRow) -> Result<JobRow> {
        let job_id = row.id;
        let now = self.clock.now();

        let submitting = {
            let _guard = self.job_lock(job_id).await?;
            match self
                .db
                .update_job(
                    job_id,
                    JobStatus::Pending,
                    JobTransition {
                        status: Some(JobStatus::Submitting),
                        started_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?
            {
                Some(row) => row,
                // Raced with a cancel; whatever won is current
                None => return Ok(self.db.get_job(job_id).await?.ok_or(DeeprError::JobNotFound(job_id))?),
            }
        };
        self.publish_status(&submitting);

        let provider = self.providers.get(submitting.provider_kind())?;
        let request = self.build_request(&submitting).await;

        let outcome =
            tokio::time::timeout(self.config.submit_timeout, provider.submit(&request)).await;

        match outcome {
            Err(_elapsed) => {
                warn!(job_id = %job_id, "Provider did not ack submit in time");
                self.fail_from(
                    &submitting,
                    JobStatus::Submitting,
                    JobError::new(
                        ErrorKind::SubmitTimeout,
                        format!("no ack within {:?}", self.config.submit_timeout),
                    ),
                )
                .await
            }
            Ok(Err(err)) => {
                let kind = err.kind().unwrap_or(ErrorKind::InvalidRequest);
                warn!(job_id = %job_id, error = %err, "Provider rejected submission");
                self.fail_from(
                    &submitting,
                    JobStatus::Submitting,
                    JobError::new(kind, err.to_string()),
                )
                .await
            }
            Ok(Ok(provider_job_id)) => {
                let ack = {
                    let _guard = self.job_lock(job_id).await?;
                    self.db
                        .update_job(
                            job_id,
                            JobStatus::Submitting,
                            JobTransition {
                                status: Some(JobStatus::Processing),
                                provider_job_id: Some(provider_job_id.clone()),
                                last_poll_at: Some(self.clock.now()),
                                ..Default::default()
                            },
                        )
                        .await?
                };
                match ack {
                    Some(row) => {
                        info!(job_id = %job_id, provider_job_id = %provider_job_id, "Job processing");
                        self.publish_status(&row);
                        Ok(row)
                    }
                    None => {
                        // Cancelled while the submit was in flight; release
                        // the remote job and report the current state
                        let _ = provider.cancel(&provider_job_id).await;
                        Ok(self
                            .db
                            .get_job(job_id)
                            .await?
                            .ok_or(DeeprError::JobNotFound(job_id))?)
                    }
                }
            }
        }
    }

    /// Build the provider request, materialising file search for providers
    /// without native support by injecting retrieved excerpts
    async fn build_request(&self, row: &JobRow) -> ResearchRequest {
        let kind = row.provider_kind();
        let mut prompt = row.prompt.clone();
        let mut tools = Vec::new();

        for tool in row.tool_specs() {
            if let ToolSpec::FileSearch { store_ref } = &tool {
                if !supports_tool(kind, &tool) {
                    match self.docstore.search(store_ref, &row.prompt, 5).await {
                        Ok(hits) if !hits.is_empty() => {
                            prompt.push_str("\n\n## Retrieved context\n\n");
                            for hit in hits {
                                prompt.push_str(&format!("- {}\n", hit.excerpt));
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(job_id = %row.id, error = %err, "File search materialisation failed");
                        }
                    }
                    continue;
                }
            }
            tools.push(tool);
        }

        ResearchRequest {
            job_id: row.id,
            prompt,
            model: row.model.clone(),
            tools,
            vector_store_ref: row.vector_store_ref.clone(),
        }
    }

    // ============================================
    // Cancellation
    // ============================================

    /// Cancel a job; legal from pending, submitting and processing.
    /// Idempotent: cancelling an already-cancelled job is a no-op.
    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        // The compare-and-set can lose against an in-flight submit ack;
        // re-inspect and retry rather than guessing who won.
        for _ in 0..4 {
            let row = self
                .db
                .get_job(id)
                .await?
                .ok_or(DeeprError::JobNotFound(id))?;

            let expected = match row.status() {
                JobStatus::Cancelled => return Ok(row.into_dto()),
                status if status.is_terminal() => return Err(DeeprError::AlreadyTerminal(id)),
                status => status,
            };

            if expected == JobStatus::Processing {
                // Best-effort remote cancel before the local transition;
                // never under the per-job lock
                if let Some(provider_job_id) = &row.provider_job_id {
                    let provider = self.providers.get(row.provider_kind())?;
                    if let Err(err) = provider.cancel(provider_job_id).await {
                        warn!(job_id = %id, error = %err, "Remote cancel failed");
                    }
                }
            }

            let updated = {
                let _guard = self.job_lock(id).await?;
                self.db
                    .update_job(
                        id,
                        expected,
                        JobTransition {
                            status: Some(JobStatus::Cancelled),
                            completed_at: Some(self.clock.now()),
                            ..Default::default()
                        },
                    )
                    .await?
            };

            if let Some(row) = updated {
                info!(job_id = %id, "Job cancelled");
                self.publish_status(&row);
                self.forget_lock(id).await;
                return Ok(row.into_dto());
            }
        }

        Err(DeeprError::Storage(anyhow::anyhow!(
            "cancel of job {} kept racing with other transitions",
            id
        )))
    }

    // ============================================
    // Poller-facing transition API
    // ============================================

    /// Record a poll observation for a processing job
    pub async fn record_poll_progress(&self, row: &JobRow, progress: Option<f64>) -> Result<()> {
        let now = self.clock.now();
        let progressed = match (progress, row.progress_fraction) {
            (Some(new), Some(old)) => (new - old).abs() > f64::EPSILON,
            (Some(_), None) => true,
            _ => false,
        };

        self.db
            .update_job(
                row.id,
                JobStatus::Processing,
                JobTransition {
                    progress_fraction: progress,
                    last_poll_at: Some(now),
                    last_progress_at: progressed.then_some(now),
                    ..Default::default()
                },
            )
            .await?;

        if progressed {
            if let Some(progress_fraction) = progress {
                self.bus.publish(DeeprEvent::JobProgress {
                    job_id: row.id,
                    progress_fraction,
                });
            }
        }
        Ok(())
    }

    /// Finish a job with its fetched artifact
    ///
    /// Safe to call more than once for the same result: the artifact write
    /// and the spend record are idempotent and the transition fires once.
    pub async fn complete_job(&self, row: &JobRow, result: &ResearchResult) -> Result<()> {
        let markdown = result.markdown.as_bytes();
        let hash = self.artifacts.store(markdown).await?;
        let citations_json = serde_json::to_string(&result.citations).map_err(anyhow::Error::from)?;
        self.db
            .insert_artifact(&hash, markdown.len() as i64, &citations_json, self.clock.now())
            .await?;

        // Spend before the terminal transition: a crash in between is
        // recovered by re-polling, and the ledger tolerates the replay
        self.governor
            .record_spend(row.id, result.cost, &row.provider, &row.model)
            .await?;

        let updated = {
            let _guard = self.job_lock(row.id).await?;
            self.db
                .update_job(
                    row.id,
                    JobStatus::Processing,
                    JobTransition {
                        status: Some(JobStatus::Completed),
                        progress_fraction: Some(1.0),
                        actual_cost: Some(result.cost),
                        token_usage: Some(result.token_usage),
                        result_ref: Some(hash.clone()),
                        last_poll_at: Some(self.clock.now()),
                        completed_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                )
                .await?
        };

        if let Some(job) = updated {
            if let Some(cap) = job.budget_cap {
                if result.cost > cap && !job.override_approved {
                    warn!(job_id = %job.id, cost = result.cost, cap, "Actual cost exceeded cap without an override");
                }
            }
            info!(job_id = %job.id, cost = result.cost, "Job completed");
            self.bus.publish(DeeprEvent::JobCompleted {
                job_id: job.id,
                actual_cost: result.cost,
                result_ref: hash,
            });
            self.forget_lock(job.id).await;
        }
        Ok(())
    }

    /// Fail a job from the given non-terminal state
    pub async fn fail_from(
        &self,
        row: &JobRow,
        expected: JobStatus,
        error: JobError,
    ) -> Result<JobRow> {
        let updated = {
            let _guard = self.job_lock(row.id).await?;
            self.db
                .update_job(
                    row.id,
                    expected,
                    JobTransition {
                        status: Some(JobStatus::Failed),
                        error: Some(error.clone()),
                        completed_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                )
                .await?
        };

        match updated {
            Some(job) => {
                warn!(job_id = %job.id, kind = ?error.kind, "Job failed");
                self.bus.publish(DeeprEvent::JobFailed {
                    job_id: job.id,
                    error,
                });
                self.forget_lock(job.id).await;
                Ok(job)
            }
            None => self
                .db
                .get_job(row.id)
                .await?
                .ok_or(DeeprError::JobNotFound(row.id)),
        }
    }

    /// Count an `unknown` poll; after the configured streak the provider
    /// has lost the job and it is failed
    pub async fn note_unknown_poll(&self, row: &JobRow) -> Result<()> {
        let streak = row.unknown_polls + 1;
        if streak >= self.config.unknown_poll_limit as i64 {
            self.fail_from(
                row,
                JobStatus::Processing,
                JobError::new(
                    ErrorKind::ProviderLostJob,
                    format!("provider returned unknown {} times", streak),
                ),
            )
            .await?;
        } else {
            self.db
                .update_job(
                    row.id,
                    JobStatus::Processing,
                    JobTransition {
                        unknown_polls: Some(streak),
                        last_poll_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Fail jobs stuck in `submitting` beyond the submit timeout (covers
    /// crash recovery, where the in-flight submit task is gone)
    pub async fn sweep_submit_timeouts(&self) -> Result<()> {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(self.config.submit_timeout).expect("timeout in range");

        for row in self.db.list_jobs_by_status(JobStatus::Submitting).await? {
            let started = row.started_at.unwrap_or(row.created_at);
            if started < cutoff {
                self.fail_from(
                    &row,
                    JobStatus::Submitting,
                    JobError::new(
                        ErrorKind::SubmitTimeout,
                        format!("no ack within {:?}", self.config.submit_timeout),
                    ),
                )
                .await?;
            }
        }
        Ok(())
    }

    // ============================================
    // Internals
    // ============================================

    fn publish_status(&self, row: &JobRow) {
        self.bus.publish(DeeprEvent::JobStatusChanged {
            job_id: row.id,
            status: row.status(),
        });
    }

    async fn job_lock(&self, id: Uuid) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        tokio::time::timeout(self.config.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                DeeprError::Storage(anyhow::anyhow!("job {} transition lock timed out", id))
            })
    }

    async fn forget_lock(&self, id: Uuid) {
        self.locks.lock().await.remove(&id);
    }

    pub fn config(&self) -> &DeeprConfig {
        &self.config
    }
}

// Background poller
//
// One cooperative loop reconciles local `processing` jobs with their
// providers: a snapshot is read, one batched poll goes out per provider,
// and every write flows back through the job queue's transition API.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use deepr_contracts::{DeeprEvent, JobStatus, ProviderKind};
use deepr_core::clock::Clock;
use deepr_core::config::DeeprConfig;
use deepr_core::error::Result;
use deepr_core::provider::{ProviderRegistry, RemoteStatus};
use deepr_core::EventBus;
use deepr_storage::{Database, JobRow};

use crate::queue::JobQueue;

pub struct Poller {
    db: Database,
    queue: Arc<JobQueue>,
    providers: ProviderRegistry,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: DeeprConfig,
}

/// Handle to a running poller loop
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

impl Poller {
    pub fn new(
        db: Database,
        queue: Arc<JobQueue>,
        providers: ProviderRegistry,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: DeeprConfig,
    ) -> Self {
        Self {
            db,
            queue,
            providers,
            bus,
            clock,
            config,
        }
    }

    /// Start the tick loop; the first tick runs immediately, which is what
    /// replays `processing` jobs after a crash
    pub fn spawn(self: &Arc<Self>) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poller = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Poller shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = poller.tick().await {
                            error!(error = %err, "Poller tick failed");
                        }
                    }
                }
            }
        });

        PollerHandle {
            shutdown_tx,
            handle,
        }
    }

    /// One reconciliation pass; public so tests can drive it deterministically
    pub async fn tick(&self) -> Result<()> {
        self.queue.dispatch_pending().await?;
        self.queue.sweep_submit_timeouts().await?;
        self.poll_processing().await?;
        self.flag_stuck_jobs().await?;
        Ok(())
    }

    async fn poll_processing(&self) -> Result<()> {
        let jobs = self.db.list_jobs_by_status(JobStatus::Processing).await?;
        if jobs.is_empty() {
            return Ok(());
        }

        let mut by_provider: HashMap<ProviderKind, Vec<JobRow>> = HashMap::new();
        for row in jobs {
            if row.provider_job_id.is_some() {
                by_provider.entry(row.provider_kind()).or_default().push(row);
            }
        }

        for (kind, rows) in by_provider {
            let provider = match self.providers.get(kind) {
                Ok(provider) => provider,
                Err(err) => {
                    warn!(provider = %kind, error = %err, "No backend for processing jobs");
                    continue;
                }
            };

            let ids: Vec<String> = rows
                .iter()
                .filter_map(|row| row.provider_job_id.clone())
                .collect();

            // One batched poll per provider and tick
            let polls = match provider.poll(&ids).await {
                Ok(polls) => polls,
                Err(err) => {
                    // Retryable by construction: the next tick polls again
                    warn!(provider = %kind, error = %err, "Batched poll failed");
                    continue;
                }
            };

            let statuses: HashMap<String, RemoteStatus> = polls
                .into_iter()
                .map(|poll| (poll.provider_job_id, poll.status))
                .collect();

            for row in rows {
                let provider_job_id = row
                    .provider_job_id
                    .clone()
                    .expect("rows without provider ids were filtered");
                let Some(status) = statuses.get(&provider_job_id) else {
                    self.queue.note_unknown_poll(&row).await?;
                    continue;
                };

                match status {
                    RemoteStatus::Running { progress } => {
                        self.queue.record_poll_progress(&row, *progress).await?;
                    }
                    RemoteStatus::Completed => {
                        match provider.fetch_result(&provider_job_id).await {
                            Ok(result) => self.queue.complete_job(&row, &result).await?,
                            Err(err) => {
                                // Leave the job processing; fetch retries
                                // next tick
                                warn!(job_id = %row.id, error = %err, "Result fetch failed");
                            }
                        }
                    }
                    RemoteStatus::Failed { error } => {
                        self.queue
                            .fail_from(&row, JobStatus::Processing, error.clone())
                            .await?;
                    }
                    RemoteStatus::Unknown => {
                        self.queue.note_unknown_poll(&row).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Surface processing jobs with no progress beyond the threshold.
    /// Flag only: deep research legitimately runs for hours, so nothing is
    /// cancelled here.
    async fn flag_stuck_jobs(&self) -> Result<()> {
        let now = self.clock.now();
        let cutoff = now
            - chrono::Duration::from_std(self.config.stuck_threshold).expect("threshold in range");

        for row in self.db.list_stuck_jobs(cutoff).await? {
            let reference = row
                .last_progress_at
                .or(row.started_at)
                .unwrap_or(row.created_at);
            let minutes = (now - reference).num_minutes();
            self.bus.publish(DeeprEvent::JobStuck {
                job_id: row.id,
                minutes_without_progress: minutes,
            });
        }
        Ok(())
    }
}

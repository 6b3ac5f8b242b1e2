// Autonomous learning loop
//
// Turns an expert's open gaps into research campaigns under a budget, and
// folds completed campaign results back into beliefs through the expert
// store (the loop itself never writes a belief).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use deepr_contracts::CampaignStatus;
use deepr_core::error::{DeeprError, Result};
use deepr_core::pricing::{estimate_job_cost, find_model};
use deepr_core::EventBus;
use deepr_storage::{Database, GapRow};

use crate::campaign::{CampaignEngine, CampaignSpec, PlannedTopic};
use crate::expert::ExpertStore;
use crate::queue::DEFAULT_MODEL;
use crate::wait::await_campaign_terminal;

/// How long one gap campaign may run before the loop moves on
const CAMPAIGN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Why a learning run stopped
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    BudgetExhausted,
    NoOpenGaps,
    Paused,
}

/// Outcome of one learning run
#[derive(Debug, Clone, Serialize)]
pub struct LearningReport {
    pub expert: String,
    pub campaigns_run: Vec<Uuid>,
    pub gaps_filled: Vec<Uuid>,
    pub spent: f64,
    pub halt_reason: HaltReason,
}

pub struct LearningLoop {
    db: Database,
    experts: Arc<ExpertStore>,
    campaigns: Arc<CampaignEngine>,
    bus: EventBus,
    paused: RwLock<HashSet<Uuid>>,
}

impl LearningLoop {
    pub fn new(
        db: Database,
        experts: Arc<ExpertStore>,
        campaigns: Arc<CampaignEngine>,
        bus: EventBus,
    ) -> Self {
        Self {
            db,
            experts,
            campaigns,
            bus,
            paused: RwLock::new(HashSet::new()),
        }
    }

    /// Run the expert -> gap -> research -> learn loop until the budget is
    /// spent, no gaps remain, or the user pauses
    pub async fn run(&self, name: &str, budget: f64, top_k: usize) -> Result<LearningReport> {
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;

        let mut report = LearningReport {
            expert: name.to_string(),
            campaigns_run: Vec::new(),
            gaps_filled: Vec::new(),
            spent: 0.0,
            halt_reason: HaltReason::NoOpenGaps,
        };

        'rounds: loop {
            if self.paused.read().await.contains(&expert.id) {
                report.halt_reason = HaltReason::Paused;
                break;
            }

            // Highest-priority open gaps not already being researched
            let gaps: Vec<GapRow> = self
                .db
                .list_gaps(expert.id, true)
                .await?
                .into_iter()
                .filter(|gap| gap.campaign_id.is_none())
                .collect();
            if gaps.is_empty() {
                report.halt_reason = HaltReason::NoOpenGaps;
                break;
            }

            // Top-K that fit the remaining budget
            let mut batch = Vec::new();
            let mut projected = report.spent;
            for gap in gaps {
                if batch.len() >= top_k {
                    break;
                }
                let estimate = gap_estimate(&gap);
                if projected + estimate > budget {
                    continue;
                }
                projected += estimate;
                batch.push(gap);
            }
            if batch.is_empty() {
                report.halt_reason = HaltReason::BudgetExhausted;
                break;
            }

            for gap in batch {
                if self.paused.read().await.contains(&expert.id) {
                    report.halt_reason = HaltReason::Paused;
                    break 'rounds;
                }

                let campaign_id = self.research_gap(name, &gap, None).await?;
                report.campaigns_run.push(campaign_id);

                let row = await_campaign_terminal(
                    &self.db,
                    &self.bus,
                    campaign_id,
                    CAMPAIGN_TIMEOUT,
                )
                .await?;
                report.spent += row.actual_cost;
                self.experts.add_spend(name, row.actual_cost).await?;

                if row.status() == CampaignStatus::Completed {
                    if let Some(job) = self.campaigns.goal_result_job(campaign_id).await? {
                        self.experts.integrate_result(name, &job).await?;
                        self.experts.close_gap(name, gap.id, job.id).await?;
                        report.gaps_filled.push(gap.id);
                    }
                } else {
                    warn!(expert = %name, campaign_id = %campaign_id, "Gap campaign did not complete");
                }

                if report.spent >= budget {
                    report.halt_reason = HaltReason::BudgetExhausted;
                    break 'rounds;
                }
            }
            // Synthesis may have surfaced new gaps; go around again
        }

        info!(
            expert = %name,
            campaigns = report.campaigns_run.len(),
            gaps_filled = report.gaps_filled.len(),
            spent = report.spent,
            halt = ?report.halt_reason,
            "Learning run finished"
        );
        Ok(report)
    }

    /// Research one specific gap; returns the campaign id immediately and
    /// integrates the result in the background
    pub async fn fill_gap(
        self: &Arc<Self>,
        name: &str,
        gap_id: Uuid,
        budget: Option<f64>,
    ) -> Result<Uuid> {
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;
        let gap = self
            .db
            .get_gap(gap_id)
            .await?
            .filter(|gap| gap.expert_id == expert.id)
            .ok_or_else(|| DeeprError::invalid_request(format!("no gap {} for expert", gap_id)))?;

        let campaign_id = self.research_gap(name, &gap, budget).await?;

        let this = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let outcome =
                await_campaign_terminal(&this.db, &this.bus, campaign_id, CAMPAIGN_TIMEOUT).await;
            match outcome {
                Ok(row) if row.status() == CampaignStatus::Completed => {
                    let _ = this.experts.add_spend(&name, row.actual_cost).await;
                    match this.campaigns.goal_result_job(campaign_id).await {
                        Ok(Some(job)) => {
                            if let Err(err) = this.experts.integrate_result(&name, &job).await {
                                warn!(expert = %name, error = %err, "Gap integration failed");
                            } else if let Err(err) =
                                this.experts.close_gap(&name, gap.id, job.id).await
                            {
                                warn!(expert = %name, error = %err, "Gap close failed");
                            }
                        }
                        Ok(None) => {
                            warn!(expert = %name, campaign_id = %campaign_id, "Campaign finished without a goal result")
                        }
                        Err(err) => warn!(expert = %name, error = %err, "Goal lookup failed"),
                    }
                }
                Ok(row) => {
                    warn!(expert = %name, campaign_id = %campaign_id, status = %row.status(), "Gap campaign unsuccessful")
                }
                Err(err) => warn!(expert = %name, error = %err, "Gap campaign wait failed"),
            }
        });

        Ok(campaign_id)
    }

    /// Halt the loop for an expert before its next campaign
    pub async fn pause(&self, name: &str) -> Result<()> {
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;
        self.paused.write().await.insert(expert.id);
        info!(expert = %name, "Learning loop paused");
        Ok(())
    }

    pub async fn resume(&self, name: &str) -> Result<()> {
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;
        self.paused.write().await.remove(&expert.id);
        Ok(())
    }

    /// Stop the loop and cancel its in-flight gap campaigns
    pub async fn cancel(&self, name: &str) -> Result<()> {
        self.pause(name).await?;
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;

        for row in self.db.list_campaigns(1_000, 0).await? {
            if row.expert_id == Some(expert.id) && !row.status().is_terminal() {
                match self.campaigns.cancel(row.id).await {
                    Ok(_) | Err(DeeprError::AlreadyTerminal(_)) => {}
                    Err(err) => {
                        warn!(expert = %name, campaign_id = %row.id, error = %err, "Campaign cancel failed")
                    }
                }
            }
        }
        Ok(())
    }

    async fn research_gap(&self, name: &str, gap: &GapRow, budget: Option<f64>) -> Result<Uuid> {
        let expert = self
            .db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))?;

        let campaign = self
            .campaigns
            .create(CampaignSpec {
                goal: gap.topic.clone(),
                topics: Some(vec![PlannedTopic {
                    prompt: format!(
                        "Research for the expert \"{}\" ({}): {}",
                        expert.name, expert.domain_description, gap.topic
                    ),
                    depends_on: Vec::new(),
                }]),
                auto_continue: false,
                max_rounds: Some(1),
                budget_cap: budget,
                expert_id: Some(expert.id),
                gap_id: Some(gap.id),
            })
            .await?;

        self.db.set_gap_campaign(gap.id, campaign.id).await?;
        info!(expert = %name, gap = %gap.topic, campaign_id = %campaign.id, "Gap research scheduled");
        Ok(campaign.id)
    }
}

/// Admission-style estimate for researching one gap
fn gap_estimate(gap: &GapRow) -> f64 {
    let profile = find_model(DEFAULT_MODEL).expect("default model is registered");
    estimate_job_cost(profile, gap.topic.chars().count() + 200)
}

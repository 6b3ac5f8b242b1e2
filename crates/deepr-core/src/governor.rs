// Budget governor
//
// Single in-process authority over spend. Counters live in memory for O(1)
// admission checks; the append-only cost ledger is the source of truth and
// counters are re-materialised from it on init, on month rollover, and
// whenever the rolling daily window goes stale.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use deepr_contracts::{AdmissionDecision, CostBreakdown, CostSummary, ElicitOption, SpendPeriod};

use crate::clock::Clock;
use crate::error::Result;

/// New entry for the append-only cost ledger
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub job_id: Uuid,
    pub amount: f64,
    pub provider: String,
    pub model: String,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence port for the cost ledger
#[async_trait::async_trait]
pub trait CostLedger: Send + Sync {
    /// Append an entry; returns false when `(job_id, amount)` was already
    /// recorded (poller retries tolerate this)
    async fn append(&self, entry: NewLedgerEntry) -> anyhow::Result<bool>;

    /// Sum of amounts recorded at or after `since`
    async fn total_since(&self, since: DateTime<Utc>) -> anyhow::Result<f64>;

    /// Sum over the whole ledger
    async fn total_all(&self) -> anyhow::Result<f64>;

    /// Totals grouped by model and by provider, largest first, within the
    /// window starting at `since` (or the whole ledger when `None`)
    async fn breakdown_since(
        &self,
        since: Option<DateTime<Utc>>,
        top_n: usize,
    ) -> anyhow::Result<(Vec<CostBreakdown>, Vec<CostBreakdown>)>;
}

/// Spend limits enforced at admission
#[derive(Debug, Clone)]
pub struct BudgetLimits {
    /// Rolling 24h limit, USD
    pub daily: Option<f64>,
    /// Calendar-month limit, USD (month boundary fixed to UTC at init)
    pub monthly: Option<f64>,
    /// Fraction above the caller's cap that still admits without elicitation
    pub elicit_overrun_fraction: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily: None,
            monthly: None,
            elicit_overrun_fraction: 0.10,
        }
    }
}

struct CounterState {
    daily: f64,
    daily_refreshed_at: DateTime<Utc>,
    monthly: f64,
    month_anchor: (i32, u32),
}

/// Process-scoped budget authority
///
/// Construct with `init`, tear down with `shutdown`; no ambient access.
pub struct BudgetGovernor {
    limits: BudgetLimits,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn CostLedger>,
    state: Mutex<CounterState>,
}

/// How long the cached rolling-24h counter is trusted before re-reading
/// the ledger
const DAILY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

const BREAKDOWN_TOP_N: usize = 5;

impl BudgetGovernor {
    /// Materialise counters from the ledger and return the governor handle
    pub async fn init(
        limits: BudgetLimits,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn CostLedger>,
    ) -> Result<Arc<Self>> {
        let now = clock.now();
        let daily = ledger
            .total_since(now - chrono::Duration::hours(24))
            .await?;
        let monthly = ledger.total_since(month_start(now)).await?;

        info!(
            daily_spent = daily,
            monthly_spent = monthly,
            "Budget governor initialised from ledger"
        );

        Ok(Arc::new(Self {
            limits,
            clock,
            ledger,
            state: Mutex::new(CounterState {
                daily,
                daily_refreshed_at: now,
                monthly,
                month_anchor: (now.year(), now.month()),
            }),
        }))
    }

    pub fn shutdown(&self) {
        info!("Budget governor shut down");
    }

    /// Gate a submission
    ///
    /// `override_approved` bypasses both the caller cap and bucket checks;
    /// the queue records the override on the job.
    pub async fn check_admission(
        &self,
        estimated_cost: f64,
        caller_budget_cap: Option<f64>,
        override_approved: bool,
    ) -> Result<AdmissionDecision> {
        if let Some(cap) = caller_budget_cap {
            if cap <= 0.0 {
                return Ok(AdmissionDecision::Reject {
                    reason: "budget_cap must be positive".to_string(),
                });
            }
        }

        if override_approved {
            return Ok(AdmissionDecision::Admit {
                estimated_cost,
            });
        }

        if let Some(cap) = caller_budget_cap {
            if estimated_cost > cap * (1.0 + self.limits.elicit_overrun_fraction) {
                return Ok(AdmissionDecision::Elicit {
                    estimated_cost,
                    budget_cap: cap,
                    options: ElicitOption::all().to_vec(),
                });
            }
        }

        let mut state = self.state.lock().await;
        self.refresh_counters(&mut state).await?;

        if let Some(limit) = self.limits.daily {
            if state.daily + estimated_cost > limit {
                debug!(
                    daily_spent = state.daily,
                    estimated_cost, limit, "Daily budget would be exceeded"
                );
                return Ok(AdmissionDecision::Elicit {
                    estimated_cost,
                    budget_cap: limit - state.daily,
                    options: ElicitOption::all().to_vec(),
                });
            }
        }

        if let Some(limit) = self.limits.monthly {
            if state.monthly + estimated_cost > limit {
                debug!(
                    monthly_spent = state.monthly,
                    estimated_cost, limit, "Monthly budget would be exceeded"
                );
                return Ok(AdmissionDecision::Elicit {
                    estimated_cost,
                    budget_cap: limit - state.monthly,
                    options: ElicitOption::all().to_vec(),
                });
            }
        }

        Ok(AdmissionDecision::Admit { estimated_cost })
    }

    /// Record actual spend for a job
    ///
    /// Idempotent by `(job_id, amount)`; returns whether a new ledger entry
    /// was written.
    pub async fn record_spend(
        &self,
        job_id: Uuid,
        amount: f64,
        provider: &str,
        model: &str,
    ) -> Result<bool> {
        let inserted = self
            .ledger
            .append(NewLedgerEntry {
                job_id,
                amount,
                provider: provider.to_string(),
                model: model.to_string(),
                recorded_at: self.clock.now(),
            })
            .await?;

        if inserted {
            let mut state = self.state.lock().await;
            state.daily += amount;
            state.monthly += amount;
            debug!(job_id = %job_id, amount, "Spend recorded");
        } else {
            debug!(job_id = %job_id, amount, "Duplicate spend ignored");
        }

        Ok(inserted)
    }

    /// Bucket totals and top spenders for a reporting window
    pub async fn summary(&self, period: SpendPeriod) -> Result<CostSummary> {
        let now = self.clock.now();
        let day_ago = now - chrono::Duration::hours(24);

        let daily_total = self.ledger.total_since(day_ago).await?;
        let monthly_total = self.ledger.total_since(month_start(now)).await?;

        let (window, total) = match period {
            SpendPeriod::Today => (Some(day_ago), daily_total),
            SpendPeriod::Month => (Some(month_start(now)), monthly_total),
            SpendPeriod::All => (None, self.ledger.total_all().await?),
        };

        let (by_model, by_provider) = self.ledger.breakdown_since(window, BREAKDOWN_TOP_N).await?;

        Ok(CostSummary {
            period,
            total,
            daily_total,
            monthly_total,
            daily_limit: self.limits.daily,
            monthly_limit: self.limits.monthly,
            by_model,
            by_provider,
        })
    }

    async fn refresh_counters(&self, state: &mut CounterState) -> Result<()> {
        let now = self.clock.now();

        // Rolling 24h window: entries age out, so the cached counter is
        // only trusted briefly before re-reading the ledger.
        let stale = now - state.daily_refreshed_at
            > chrono::Duration::from_std(DAILY_REFRESH_INTERVAL).expect("interval in range");
        if stale || now < state.daily_refreshed_at {
            state.daily = self
                .ledger
                .total_since(now - chrono::Duration::hours(24))
                .await?;
            state.daily_refreshed_at = now;
        }

        let anchor = (now.year(), now.month());
        if anchor != state.month_anchor {
            state.monthly = self.ledger.total_since(month_start(now)).await?;
            state.month_anchor = anchor;
        }

        Ok(())
    }
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is a valid timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryCostLedger;

    async fn governor_with(
        daily: Option<f64>,
        clock: Arc<ManualClock>,
    ) -> (Arc<BudgetGovernor>, Arc<InMemoryCostLedger>) {
        let ledger = Arc::new(InMemoryCostLedger::new());
        let limits = BudgetLimits {
            daily,
            ..BudgetLimits::default()
        };
        let governor = BudgetGovernor::init(limits, clock, ledger.clone())
            .await
            .unwrap();
        (governor, ledger)
    }

    #[tokio::test]
    async fn admits_within_all_buckets() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(Some(1.0), clock).await;

        let decision = governor
            .check_admission(0.30, Some(0.50), false)
            .await
            .unwrap();
        assert!(matches!(decision, AdmissionDecision::Admit { .. }));
    }

    #[tokio::test]
    async fn daily_overrun_elicits_with_three_options() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(Some(1.0), clock).await;

        governor
            .record_spend(Uuid::now_v7(), 0.95, "openai", "small")
            .await
            .unwrap();

        let decision = governor.check_admission(0.30, None, false).await.unwrap();
        match decision {
            AdmissionDecision::Elicit { options, .. } => {
                assert_eq!(options, ElicitOption::all().to_vec());
            }
            other => panic!("expected elicitation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn override_bypasses_buckets() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(Some(1.0), clock).await;

        governor
            .record_spend(Uuid::now_v7(), 0.95, "openai", "small")
            .await
            .unwrap();

        let decision = governor.check_admission(0.30, None, true).await.unwrap();
        assert!(matches!(decision, AdmissionDecision::Admit { .. }));
    }

    #[tokio::test]
    async fn per_job_overrun_beyond_tolerance_elicits() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(None, clock).await;

        // 0.12 > 0.10 * 1.1
        let decision = governor
            .check_admission(0.12, Some(0.10), false)
            .await
            .unwrap();
        assert!(matches!(decision, AdmissionDecision::Elicit { .. }));

        // 0.105 <= 0.10 * 1.1 stays admitted
        let decision = governor
            .check_admission(0.105, Some(0.10), false)
            .await
            .unwrap();
        assert!(matches!(decision, AdmissionDecision::Admit { .. }));
    }

    #[tokio::test]
    async fn record_spend_is_idempotent_by_job_and_amount() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, ledger) = governor_with(None, clock).await;
        let job_id = Uuid::now_v7();

        assert!(governor
            .record_spend(job_id, 0.04, "openai", "small")
            .await
            .unwrap());
        assert!(!governor
            .record_spend(job_id, 0.04, "openai", "small")
            .await
            .unwrap());

        let total = ledger.total_all().await.unwrap();
        assert!((total - 0.04).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn daily_counter_ages_out_after_refresh() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(Some(1.0), clock.clone()).await;

        governor
            .record_spend(Uuid::now_v7(), 0.95, "openai", "small")
            .await
            .unwrap();

        // 25 hours later the rolling window no longer contains the spend
        clock.advance(Duration::from_secs(25 * 3600));
        let decision = governor.check_admission(0.30, None, false).await.unwrap();
        assert!(matches!(decision, AdmissionDecision::Admit { .. }));
    }

    #[tokio::test]
    async fn summary_reports_bucket_totals() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (governor, _) = governor_with(Some(1.0), clock).await;

        governor
            .record_spend(Uuid::now_v7(), 0.04, "openai", "small")
            .await
            .unwrap();

        let summary = governor.summary(SpendPeriod::Today).await.unwrap();
        assert!((summary.total - 0.04).abs() < 1e-9);
        assert_eq!(summary.daily_limit, Some(1.0));
        assert_eq!(summary.by_model[0].key, "small");
    }
}

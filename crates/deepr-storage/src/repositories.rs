// Repository layer for database operations
//
// All writes go through this façade; job rows are updated with a
// status-guarded compare-and-set so a transition committed by one task can
// never be overwritten by a stale writer.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use deepr_contracts::{CampaignStatus, CostBreakdown, JobStatus, TopicState};
use deepr_core::governor::{CostLedger, NewLedgerEntry};

use crate::models::*;

const JOB_COLUMNS: &str = "id, prompt, model, provider, tools, vector_store_ref, budget_cap, \
     metadata, priority, parent_topic_id, provider_job_id, status, progress_fraction, \
     estimated_cost, actual_cost, override_approved, token_usage, error, result_ref, \
     unknown_polls, created_at, started_at, last_poll_at, last_progress_at, completed_at";

const CAMPAIGN_COLUMNS: &str = "id, goal, status, auto_continue, max_rounds, current_round, \
     budget_cap, actual_cost, expert_id, gap_id, planner_job_id, created_at";

const TOPIC_COLUMNS: &str = "id, phase_id, campaign_id, prompt, depends_on, estimated_cost, \
     job_id, context_summary, state, attempts, next_attempt_at";

const EXPERT_COLUMNS: &str =
    "id, name, domain_description, document_store_ref, total_spend, last_synthesised_at, created_at";

const BELIEF_COLUMNS: &str =
    "id, expert_id, statement, confidence, sources, superseded_by, created_at";

const GAP_COLUMNS: &str =
    "id, expert_id, topic, priority, discovered_at, filled_by_job, campaign_id";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) and bootstrap the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid sqlite url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        // An in-memory database exists per connection; the pool must be
        // pinned to one connection or each checkout sees an empty schema.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;

        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&pool)
            .await
            .context("failed to apply schema")?;
        info!(url = %database_url, "SQLite database ready");

        Ok(Self { pool })
    }

    /// Fresh in-memory database for tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============================================
    // Jobs
    // ============================================

    pub async fn create_job(&self, input: CreateJob) -> Result<JobRow> {
        let tools_json = serde_json::to_string(&input.tools)?;
        let metadata_json = input
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (id, prompt, model, provider, tools, vector_store_ref, budget_cap,
                              metadata, priority, parent_topic_id, estimated_cost,
                              override_approved, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(input.id)
        .bind(&input.prompt)
        .bind(&input.model)
        .bind(input.provider.as_str())
        .bind(&tools_json)
        .bind(&input.vector_store_ref)
        .bind(input.budget_cap)
        .bind(&metadata_json)
        .bind(input.priority as i64)
        .bind(input.parent_topic_id)
        .bind(input.estimated_cost)
        .bind(input.override_approved)
        .bind(input.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List jobs, newest first, optionally filtered by status
    pub async fn list_jobs(
        &self,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRow>(&format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    WHERE status = $1
                    ORDER BY created_at DESC
                    LIMIT $2 OFFSET $3
                    "#
                ))
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>(&format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    ORDER BY created_at DESC
                    LIMIT $1 OFFSET $2
                    "#
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Pending jobs in dispatch order (highest priority first, then oldest)
    pub async fn list_pending_jobs(&self) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Processing jobs with no progress update since `cutoff`
    pub async fn list_stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'processing'
              AND COALESCE(last_progress_at, started_at, created_at) < $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_inflight_jobs(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('submitting', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Status-guarded job update
    ///
    /// Applies the transition only while the row is still in `expected`;
    /// returns `None` when another writer got there first. Every call is a
    /// single durable statement, so a transition is committed before the
    /// caller observes it.
    pub async fn update_job(
        &self,
        id: Uuid,
        expected: JobStatus,
        transition: JobTransition,
    ) -> Result<Option<JobRow>> {
        let token_usage_json = transition
            .token_usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error_json = transition
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET
                status = COALESCE($3, status),
                provider_job_id = COALESCE($4, provider_job_id),
                progress_fraction = COALESCE($5, progress_fraction),
                actual_cost = COALESCE($6, actual_cost),
                token_usage = COALESCE($7, token_usage),
                error = COALESCE($8, error),
                result_ref = COALESCE($9, result_ref),
                unknown_polls = COALESCE($10, unknown_polls),
                started_at = COALESCE($11, started_at),
                last_poll_at = COALESCE($12, last_poll_at),
                last_progress_at = COALESCE($13, last_progress_at),
                completed_at = COALESCE($14, completed_at)
            WHERE id = $1 AND status = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(transition.status.map(|s| s.as_str()))
        .bind(&transition.provider_job_id)
        .bind(transition.progress_fraction)
        .bind(transition.actual_cost)
        .bind(&token_usage_json)
        .bind(&error_json)
        .bind(&transition.result_ref)
        .bind(transition.unknown_polls)
        .bind(transition.started_at)
        .bind(transition.last_poll_at)
        .bind(transition.last_progress_at)
        .bind(transition.completed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Campaigns
    // ============================================

    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<CampaignRow> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            r#"
            INSERT INTO campaigns (id, goal, status, auto_continue, max_rounds, budget_cap,
                                   expert_id, gap_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(input.id)
        .bind(&input.goal)
        .bind(input.status.as_str())
        .bind(input.auto_continue)
        .bind(input.max_rounds as i64)
        .bind(input.budget_cap)
        .bind(input.expert_id)
        .bind(input.gap_id)
        .bind(input.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignRow>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_campaign_by_planner_job(&self, job_id: Uuid) -> Result<Option<CampaignRow>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE planner_job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRow>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Status-guarded campaign transition
    pub async fn update_campaign_status(
        &self,
        id: Uuid,
        expected: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<Option<CampaignRow>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            r#"
            UPDATE campaigns SET status = $3
            WHERE id = $1 AND status = $2
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Unconditional status write, for failure paths
    pub async fn set_campaign_status(&self, id: Uuid, to: CampaignStatus) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_campaign_planner_job(&self, id: Uuid, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE campaigns SET planner_job_id = $2 WHERE id = $1")
            .bind(id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn increment_campaign_round(&self, id: Uuid) -> Result<i64> {
        let round: i64 = sqlx::query_scalar(
            "UPDATE campaigns SET current_round = current_round + 1 WHERE id = $1 RETURNING current_round",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(round)
    }

    /// Re-derive a campaign's cost as the sum of its topics' job costs
    pub async fn recompute_campaign_cost(&self, id: Uuid) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            r#"
            UPDATE campaigns
            SET actual_cost = (
                SELECT COALESCE(SUM(j.actual_cost), 0.0)
                FROM topics t JOIN jobs j ON t.job_id = j.id
                WHERE t.campaign_id = $1
            )
            WHERE id = $1
            RETURNING actual_cost
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    // ============================================
    // Phases and topics
    // ============================================

    pub async fn create_phase(
        &self,
        id: Uuid,
        campaign_id: Uuid,
        phase_index: i32,
    ) -> Result<PhaseRow> {
        let row = sqlx::query_as::<_, PhaseRow>(
            r#"
            INSERT INTO phases (id, campaign_id, phase_index, status)
            VALUES ($1, $2, $3, 'ready')
            RETURNING id, campaign_id, phase_index, status
            "#,
        )
        .bind(id)
        .bind(campaign_id)
        .bind(phase_index as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_phases(&self, campaign_id: Uuid) -> Result<Vec<PhaseRow>> {
        let rows = sqlx::query_as::<_, PhaseRow>(
            r#"
            SELECT id, campaign_id, phase_index, status
            FROM phases WHERE campaign_id = $1
            ORDER BY phase_index ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_phase_status(&self, id: Uuid, status: CampaignStatus) -> Result<()> {
        sqlx::query("UPDATE phases SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn create_topic(&self, input: CreateTopic) -> Result<TopicRow> {
        let depends_json = serde_json::to_string(&input.depends_on)?;

        let row = sqlx::query_as::<_, TopicRow>(&format!(
            r#"
            INSERT INTO topics (id, phase_id, campaign_id, prompt, depends_on, estimated_cost, state)
            VALUES ($1, $2, $3, $4, $5, $6, 'planned')
            RETURNING {TOPIC_COLUMNS}
            "#
        ))
        .bind(input.id)
        .bind(input.phase_id)
        .bind(input.campaign_id)
        .bind(&input.prompt)
        .bind(&depends_json)
        .bind(input.estimated_cost)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_topic(&self, id: Uuid) -> Result<Option<TopicRow>> {
        let row = sqlx::query_as::<_, TopicRow>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_topic_by_job(&self, job_id: Uuid) -> Result<Option<TopicRow>> {
        let row = sqlx::query_as::<_, TopicRow>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_topics_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<TopicRow>> {
        let rows = sqlx::query_as::<_, TopicRow>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE campaign_id = $1 ORDER BY id ASC"
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_topics_by_phase(&self, phase_id: Uuid) -> Result<Vec<TopicRow>> {
        let rows = sqlx::query_as::<_, TopicRow>(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE phase_id = $1 ORDER BY id ASC"
        ))
        .bind(phase_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Bind a topic to the job it was dispatched as
    pub async fn mark_topic_dispatched(
        &self,
        id: Uuid,
        job_id: Uuid,
        context_summary: Option<&str>,
        attempts: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE topics
            SET state = 'dispatched', job_id = $2, context_summary = $3,
                attempts = $4, next_attempt_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(job_id)
        .bind(context_summary)
        .bind(attempts as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_topic_state(&self, id: Uuid, state: TopicState) -> Result<()> {
        sqlx::query("UPDATE topics SET state = $2 WHERE id = $1")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Return a topic to the frontier for a delayed retry
    pub async fn schedule_topic_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE topics
            SET state = 'planned', job_id = NULL, attempts = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts as i64)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Experts
    // ============================================

    pub async fn create_expert(
        &self,
        id: Uuid,
        name: &str,
        domain_description: &str,
        document_store_ref: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<ExpertRow> {
        let row = sqlx::query_as::<_, ExpertRow>(&format!(
            r#"
            INSERT INTO experts (id, name, domain_description, document_store_ref, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {EXPERT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(domain_description)
        .bind(document_store_ref)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_expert(&self, id: Uuid) -> Result<Option<ExpertRow>> {
        let row = sqlx::query_as::<_, ExpertRow>(&format!(
            "SELECT {EXPERT_COLUMNS} FROM experts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_expert_by_name(&self, name: &str) -> Result<Option<ExpertRow>> {
        let row = sqlx::query_as::<_, ExpertRow>(&format!(
            "SELECT {EXPERT_COLUMNS} FROM experts WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_experts(&self) -> Result<Vec<ExpertRow>> {
        let rows = sqlx::query_as::<_, ExpertRow>(&format!(
            "SELECT {EXPERT_COLUMNS} FROM experts ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn set_expert_store_ref(&self, id: Uuid, store_ref: &str) -> Result<()> {
        sqlx::query("UPDATE experts SET document_store_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(store_ref)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn add_expert_spend(&self, id: Uuid, delta: f64) -> Result<()> {
        sqlx::query("UPDATE experts SET total_spend = total_spend + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn touch_expert_synthesised(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE experts SET last_synthesised_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ============================================
    // Beliefs
    // ============================================

    pub async fn create_belief(&self, input: CreateBelief) -> Result<BeliefRow> {
        let sources_json = serde_json::to_string(&input.sources)?;

        let row = sqlx::query_as::<_, BeliefRow>(&format!(
            r#"
            INSERT INTO beliefs (id, expert_id, statement, confidence, sources, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {BELIEF_COLUMNS}
            "#
        ))
        .bind(input.id)
        .bind(input.expert_id)
        .bind(&input.statement)
        .bind(input.confidence)
        .bind(&sources_json)
        .bind(input.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_belief(&self, id: Uuid) -> Result<Option<BeliefRow>> {
        let row = sqlx::query_as::<_, BeliefRow>(&format!(
            "SELECT {BELIEF_COLUMNS} FROM beliefs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_beliefs(&self, expert_id: Uuid) -> Result<Vec<BeliefRow>> {
        let rows = sqlx::query_as::<_, BeliefRow>(&format!(
            "SELECT {BELIEF_COLUMNS} FROM beliefs WHERE expert_id = $1 ORDER BY created_at ASC"
        ))
        .bind(expert_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Link a belief to its successor
    ///
    /// Succeeds at most once per belief: a supersession chain is a total
    /// order, so an already-superseded belief is never re-linked.
    pub async fn supersede_belief(&self, id: Uuid, successor: Uuid) -> Result<bool> {
        let result =
            sqlx::query("UPDATE beliefs SET superseded_by = $2 WHERE id = $1 AND superseded_by IS NULL")
                .bind(id)
                .bind(successor)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    // ============================================
    // Gaps
    // ============================================

    /// Record a gap; idempotent by `(expert_id, topic)`
    ///
    /// Returns the stored row and whether this call created it.
    pub async fn record_gap(
        &self,
        id: Uuid,
        expert_id: Uuid,
        topic: &str,
        priority: i32,
        discovered_at: DateTime<Utc>,
    ) -> Result<(GapRow, bool)> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO gaps (id, expert_id, topic, priority, discovered_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(expert_id)
        .bind(topic)
        .bind(priority as i64)
        .bind(discovered_at)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;

        let row = sqlx::query_as::<_, GapRow>(&format!(
            "SELECT {GAP_COLUMNS} FROM gaps WHERE expert_id = $1 AND topic = $2"
        ))
        .bind(expert_id)
        .bind(topic)
        .fetch_one(&self.pool)
        .await?;

        Ok((row, created))
    }

    pub async fn get_gap(&self, id: Uuid) -> Result<Option<GapRow>> {
        let row = sqlx::query_as::<_, GapRow>(&format!(
            "SELECT {GAP_COLUMNS} FROM gaps WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Gaps for an expert, highest priority first
    pub async fn list_gaps(&self, expert_id: Uuid, open_only: bool) -> Result<Vec<GapRow>> {
        let rows = if open_only {
            sqlx::query_as::<_, GapRow>(&format!(
                r#"
                SELECT {GAP_COLUMNS} FROM gaps
                WHERE expert_id = $1 AND filled_by_job IS NULL
                ORDER BY priority DESC, discovered_at ASC
                "#
            ))
            .bind(expert_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, GapRow>(&format!(
                r#"
                SELECT {GAP_COLUMNS} FROM gaps
                WHERE expert_id = $1
                ORDER BY priority DESC, discovered_at ASC
                "#
            ))
            .bind(expert_id)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows)
    }

    pub async fn set_gap_campaign(&self, id: Uuid, campaign_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE gaps SET campaign_id = $2 WHERE id = $1")
            .bind(id)
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn fill_gap(&self, id: Uuid, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE gaps SET filled_by_job = $2 WHERE id = $1")
            .bind(id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ============================================
    // Artifacts (references only; bytes live on the blob path)
    // ============================================

    pub async fn insert_artifact(
        &self,
        hash: &str,
        byte_len: i64,
        citations_json: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO artifacts (hash, byte_len, citations, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(hash)
        .bind(byte_len)
        .bind(citations_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_artifact(&self, hash: &str) -> Result<Option<ArtifactRow>> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            "SELECT hash, byte_len, citations, created_at FROM artifacts WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

// ============================================
// Cost ledger port implementation
// ============================================

#[derive(Debug, FromRow)]
struct BreakdownRow {
    key: String,
    total: f64,
    entries: i64,
}

impl From<BreakdownRow> for CostBreakdown {
    fn from(row: BreakdownRow) -> Self {
        CostBreakdown {
            key: row.key,
            total: row.total,
            entries: row.entries,
        }
    }
}

#[async_trait::async_trait]
impl CostLedger for Database {
    async fn append(&self, entry: NewLedgerEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO cost_ledger (job_id, amount, provider, model, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.amount)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn total_since(&self, since: DateTime<Utc>) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0.0) FROM cost_ledger WHERE recorded_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn total_all(&self) -> Result<f64> {
        let total: f64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0.0) FROM cost_ledger")
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn breakdown_since(
        &self,
        since: Option<DateTime<Utc>>,
        top_n: usize,
    ) -> Result<(Vec<CostBreakdown>, Vec<CostBreakdown>)> {
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let by_model = sqlx::query_as::<_, BreakdownRow>(
            r#"
            SELECT model AS key, SUM(amount) AS total, COUNT(*) AS entries
            FROM cost_ledger WHERE recorded_at >= $1
            GROUP BY model ORDER BY total DESC LIMIT $2
            "#,
        )
        .bind(since)
        .bind(top_n as i64)
        .fetch_all(&self.pool)
        .await?;

        let by_provider = sqlx::query_as::<_, BreakdownRow>(
            r#"
            SELECT provider AS key, SUM(amount) AS total, COUNT(*) AS entries
            FROM cost_ledger WHERE recorded_at >= $1
            GROUP BY provider ORDER BY total DESC LIMIT $2
            "#,
        )
        .bind(since)
        .bind(top_n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok((
            by_model.into_iter().map(Into::into).collect(),
            by_provider.into_iter().map(Into::into).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepr_contracts::{ErrorKind, JobError, ProviderKind};

    fn sample_job(id: Uuid) -> CreateJob {
        CreateJob {
            id,
            prompt: "Summarise the TLS 1.3 record layer".into(),
            model: "small".into(),
            provider: ProviderKind::OpenAi,
            tools: vec![],
            vector_store_ref: None,
            budget_cap: Some(0.10),
            metadata: None,
            priority: 3,
            parent_topic_id: None,
            estimated_cost: 0.03,
            override_approved: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn job_roundtrip_and_guarded_update() {
        let db = Database::in_memory().await.unwrap();
        let id = Uuid::now_v7();
        let row = db.create_job(sample_job(id)).await.unwrap();
        assert_eq!(row.status(), JobStatus::Pending);

        // Legal CAS from pending
        let updated = db
            .update_job(
                id,
                JobStatus::Pending,
                JobTransition {
                    status: Some(JobStatus::Submitting),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status(), JobStatus::Submitting);

        // Stale CAS no longer matches
        let stale = db
            .update_job(
                id,
                JobStatus::Pending,
                JobTransition {
                    status: Some(JobStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(stale.is_none());

        let current = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(current.status(), JobStatus::Submitting);
    }

    #[tokio::test]
    async fn job_error_json_roundtrips() {
        let db = Database::in_memory().await.unwrap();
        let id = Uuid::now_v7();
        db.create_job(sample_job(id)).await.unwrap();
        db.update_job(
            id,
            JobStatus::Pending,
            JobTransition {
                status: Some(JobStatus::Submitting),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.update_job(
            id,
            JobStatus::Submitting,
            JobTransition {
                status: Some(JobStatus::Failed),
                error: Some(JobError::new(ErrorKind::SubmitTimeout, "no ack in 60s")),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let row = db.get_job(id).await.unwrap().unwrap();
        let error = row.job_error().unwrap();
        assert_eq!(error.kind, ErrorKind::SubmitTimeout);
    }

    #[tokio::test]
    async fn ledger_is_idempotent_and_ordered() {
        let db = Database::in_memory().await.unwrap();
        let job_id = Uuid::now_v7();
        let entry = NewLedgerEntry {
            job_id,
            amount: 0.04,
            provider: "openai".into(),
            model: "small".into(),
            recorded_at: Utc::now(),
        };

        assert!(db.append(entry.clone()).await.unwrap());
        assert!(!db.append(entry).await.unwrap());

        let total = db.total_all().await.unwrap();
        assert!((total - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gap_recording_is_idempotent_by_expert_and_topic() {
        let db = Database::in_memory().await.unwrap();
        let expert = db
            .create_expert(Uuid::now_v7(), "TLS", "transport security", None, Utc::now())
            .await
            .unwrap();

        let (first, created) = db
            .record_gap(Uuid::now_v7(), expert.id, "QUIC handshake", 3, Utc::now())
            .await
            .unwrap();
        assert!(created);

        let (second, created) = db
            .record_gap(Uuid::now_v7(), expert.id, "QUIC handshake", 5, Utc::now())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, 3);
    }

    #[tokio::test]
    async fn belief_supersession_links_at_most_once() {
        let db = Database::in_memory().await.unwrap();
        let expert = db
            .create_expert(Uuid::now_v7(), "TLS", "transport security", None, Utc::now())
            .await
            .unwrap();

        let make = |statement: &str| CreateBelief {
            id: Uuid::now_v7(),
            expert_id: expert.id,
            statement: statement.into(),
            confidence: 0.8,
            sources: vec![],
            created_at: Utc::now(),
        };

        let old = db.create_belief(make("TLS 1.3 has a 1-RTT handshake")).await.unwrap();
        let new_a = db.create_belief(make("TLS 1.3 supports 0-RTT resumption")).await.unwrap();
        let new_b = db.create_belief(make("another successor")).await.unwrap();

        assert!(db.supersede_belief(old.id, new_a.id).await.unwrap());
        assert!(!db.supersede_belief(old.id, new_b.id).await.unwrap());

        let stored = db.get_belief(old.id).await.unwrap().unwrap();
        assert_eq!(stored.superseded_by, Some(new_a.id));
    }

    #[tokio::test]
    async fn campaign_cost_is_sum_of_topic_job_costs() {
        let db = Database::in_memory().await.unwrap();
        let campaign = db
            .create_campaign(CreateCampaign {
                id: Uuid::now_v7(),
                goal: "learn everything".into(),
                status: CampaignStatus::Ready,
                auto_continue: false,
                max_rounds: 1,
                budget_cap: None,
                expert_id: None,
                gap_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let phase = db.create_phase(Uuid::now_v7(), campaign.id, 0).await.unwrap();

        for cost in [0.02f64, 0.03] {
            let job_id = Uuid::now_v7();
            db.create_job(sample_job(job_id)).await.unwrap();
            db.update_job(
                job_id,
                JobStatus::Pending,
                JobTransition {
                    actual_cost: Some(cost),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

            let topic = db
                .create_topic(CreateTopic {
                    id: Uuid::now_v7(),
                    phase_id: phase.id,
                    campaign_id: campaign.id,
                    prompt: "subtopic".into(),
                    depends_on: vec![],
                    estimated_cost: 0.05,
                })
                .await
                .unwrap();
            db.mark_topic_dispatched(topic.id, job_id, None, 1).await.unwrap();
        }

        let total = db.recompute_campaign_cost(campaign.id).await.unwrap();
        assert!((total - 0.05).abs() < 1e-9);
    }
}

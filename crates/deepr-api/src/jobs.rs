// Job HTTP routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use deepr_contracts::{Citation, ElicitOption, Job, JobStatus, ProviderKind, ToolSpec};
use deepr_engine::{EnqueueOutcome, JobSpec};

use crate::common::ApiError;
use crate::AppState;

/// Request to create a job
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    pub priority: Option<u8>,
    pub budget_cap: Option<f64>,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub vector_store_ref: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Set after answering a budget elicitation with APPROVE_OVERRIDE
    #[serde(default)]
    pub override_approved: bool,
}

/// Response to job creation: either the created job or a budget elicitation
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum CreateJobResponse {
    Created {
        job_id: Uuid,
        estimated_cost: f64,
        status: JobStatus,
    },
    Elicitation {
        status: &'static str,
        estimated_cost: f64,
        budget_cap: f64,
        options: Vec<ElicitOption>,
    },
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListJobsParams {
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub stuck: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Markdown artifact plus citations
#[derive(Debug, Serialize, ToSchema)]
pub struct ResultResponse {
    pub job_id: Uuid,
    pub markdown: String,
    pub citations: Vec<Citation>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/results/:job_id", get(get_result))
        .with_state(state)
}

/// POST /jobs - Create a research job
#[utoipa::path(
    post,
    path = "/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created", body = CreateJobResponse),
        (status = 200, description = "Budget elicitation", body = CreateJobResponse),
        (status = 400, description = "Invalid request"),
        (status = 402, description = "Budget exceeded")
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let mut tools = req.tools;
    if req.enable_web_search && !tools.contains(&ToolSpec::WebSearch) {
        tools.push(ToolSpec::WebSearch);
    }

    let outcome = state
        .engine
        .create_job(JobSpec {
            prompt: req.prompt,
            model: req.model,
            provider: req.provider,
            tools,
            vector_store_ref: req.vector_store_ref,
            budget_cap: req.budget_cap,
            metadata: req.metadata,
            priority: req.priority,
            parent_topic_id: None,
            override_approved: req.override_approved,
        })
        .await?;

    let response = match outcome {
        EnqueueOutcome::Accepted(job) => (
            StatusCode::CREATED,
            Json(CreateJobResponse::Created {
                job_id: job.id,
                estimated_cost: job.estimated_cost,
                status: job.status,
            }),
        ),
        EnqueueOutcome::Rejected(job) => (
            StatusCode::OK,
            Json(CreateJobResponse::Created {
                job_id: job.id,
                estimated_cost: job.estimated_cost,
                status: job.status,
            }),
        ),
        EnqueueOutcome::Elicitation {
            estimated_cost,
            budget_cap,
            options,
        } => (
            StatusCode::OK,
            Json(CreateJobResponse::Elicitation {
                status: "requires_elicitation",
                estimated_cost,
                budget_cap,
                options,
            }),
        ),
    };

    Ok(response)
}

/// GET /jobs - List jobs
#[utoipa::path(
    get,
    path = "/jobs",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("stuck" = Option<bool>, Query, description = "Only flagged stuck jobs"),
        ("limit" = Option<i64>, Query, description = "Max results (default 20)"),
        ("offset" = Option<i64>, Query, description = "Pagination offset")
    ),
    responses((status = 200, description = "List of jobs", body = Vec<Job>)),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .engine
        .list_jobs(params.status, params.stuck, params.limit, params.offset)
        .await?;
    Ok(Json(jobs))
}

/// GET /jobs/:job_id - Status, progress and cost
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found", body = Job),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.engine.get_job(job_id).await?))
}

/// POST /jobs/:job_id/cancel - Cancel (idempotent)
#[utoipa::path(
    post,
    path = "/jobs/{job_id}/cancel",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cancelled", body = Job),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already terminal")
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.engine.cancel_job(job_id).await?))
}

/// GET /results/:job_id - Markdown artifact + citations
#[utoipa::path(
    get,
    path = "/results/{job_id}",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Result artifact", body = ResultResponse),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ResultResponse>, ApiError> {
    let (markdown, citations) = state.engine.job_result(job_id).await?;
    Ok(Json(ResultResponse {
        job_id,
        markdown,
        citations,
    }))
}

// Campaign HTTP routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use deepr_contracts::Campaign;
use deepr_engine::campaign::CampaignSpec;
use deepr_engine::PlannedTopic;

use crate::common::ApiError;
use crate::AppState;

/// Request to create a campaign; omitting `topics` asks the planner model
/// to decompose the goal (auto mode)
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub goal: String,
    #[schema(value_type = Option<Vec<Object>>)]
    pub topics: Option<Vec<PlannedTopic>>,
    #[serde(default)]
    pub auto_continue: bool,
    pub max_rounds: Option<i32>,
    pub budget_cap: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListCampaignsParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/campaigns/:campaign_id", get(get_campaign))
        .route("/campaigns/:campaign_id/pause", post(pause_campaign))
        .route("/campaigns/:campaign_id/resume", post(resume_campaign))
        .route("/campaigns/:campaign_id/cancel", post(cancel_campaign))
        .with_state(state)
}

/// POST /campaigns - Create a campaign (planned or auto)
#[utoipa::path(
    post,
    path = "/campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 201, description = "Campaign created", body = Campaign),
        (status = 400, description = "Invalid plan")
    ),
    tag = "campaigns"
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = state
        .engine
        .create_campaign(CampaignSpec {
            goal: req.goal,
            topics: req.topics,
            auto_continue: req.auto_continue,
            max_rounds: req.max_rounds,
            budget_cap: req.budget_cap,
            expert_id: None,
            gap_id: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /campaigns - List campaigns
#[utoipa::path(
    get,
    path = "/campaigns",
    params(
        ("limit" = Option<i64>, Query, description = "Max results (default 20)"),
        ("offset" = Option<i64>, Query, description = "Pagination offset")
    ),
    responses((status = 200, description = "List of campaigns", body = Vec<Campaign>)),
    tag = "campaigns"
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(params): Query<ListCampaignsParams>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(
        state.engine.list_campaigns(params.limit, params.offset).await?,
    ))
}

/// GET /campaigns/:campaign_id - Status, phases, topics
#[utoipa::path(
    get,
    path = "/campaigns/{campaign_id}",
    params(("campaign_id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign found", body = Campaign),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.engine.get_campaign(campaign_id).await?))
}

/// POST /campaigns/:campaign_id/pause
#[utoipa::path(
    post,
    path = "/campaigns/{campaign_id}/pause",
    params(("campaign_id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign paused", body = Campaign),
        (status = 409, description = "Pause not applicable")
    ),
    tag = "campaigns"
)]
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.engine.pause_campaign(campaign_id).await?))
}

/// POST /campaigns/:campaign_id/resume
#[utoipa::path(
    post,
    path = "/campaigns/{campaign_id}/resume",
    params(("campaign_id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign resumed", body = Campaign),
        (status = 409, description = "Resume not applicable")
    ),
    tag = "campaigns"
)]
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.engine.resume_campaign(campaign_id).await?))
}

/// POST /campaigns/:campaign_id/cancel - Cancel all non-terminal topic jobs
#[utoipa::path(
    post,
    path = "/campaigns/{campaign_id}/cancel",
    params(("campaign_id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign cancelled", body = Campaign),
        (status = 409, description = "Campaign already terminal")
    ),
    tag = "campaigns"
)]
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.engine.cancel_campaign(campaign_id).await?))
}

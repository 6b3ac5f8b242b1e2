// Budget summary route

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use deepr_contracts::{CostSummary, SpendPeriod};

use crate::common::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CostsParams {
    #[serde(default)]
    pub period: SpendPeriod,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/costs", get(get_costs))
        .with_state(state)
}

/// GET /costs - Bucket totals and top spenders
#[utoipa::path(
    get,
    path = "/costs",
    params(("period" = Option<String>, Query, description = "today | month | all")),
    responses((status = 200, description = "Budget summary", body = CostSummary)),
    tag = "costs"
)]
pub async fn get_costs(
    State(state): State<AppState>,
    Query(params): Query<CostsParams>,
) -> Result<Json<CostSummary>, ApiError> {
    Ok(Json(state.engine.costs(params.period).await?))
}

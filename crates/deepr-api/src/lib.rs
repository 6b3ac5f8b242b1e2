// Deepr HTTP API
// Decision: one API key per deployment (dpr_ prefix, stored hashed); OAuth
// dashboards are out of scope for the local-first server

pub mod auth;
pub mod campaigns;
pub mod common;
pub mod costs;
pub mod experts;
pub mod jobs;
pub mod ws;

use std::sync::Arc;

use axum::http::header::{HeaderName, HeaderValue};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use deepr_engine::Deepr;

use crate::auth::AuthConfig;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Deepr>,
    pub auth: AuthConfig,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        jobs::create_job,
        jobs::list_jobs,
        jobs::get_job,
        jobs::cancel_job,
        jobs::get_result,
        campaigns::create_campaign,
        campaigns::list_campaigns,
        campaigns::get_campaign,
        campaigns::pause_campaign,
        campaigns::resume_campaign,
        campaigns::cancel_campaign,
        experts::create_expert,
        experts::list_experts,
        experts::get_expert,
        experts::get_beliefs,
        experts::upload_documents,
        experts::synthesise,
        experts::query_expert,
        experts::learn,
        experts::get_gaps,
        experts::record_gap,
        experts::fill_gap,
        costs::get_costs,
    ),
    components(schemas(
        HealthResponse,
        deepr_contracts::Job,
        deepr_contracts::JobStatus,
        deepr_contracts::Campaign,
        deepr_contracts::CampaignStatus,
        deepr_contracts::Phase,
        deepr_contracts::Topic,
        deepr_contracts::Expert,
        deepr_contracts::Belief,
        deepr_contracts::Gap,
        deepr_contracts::ExpertAnswer,
        deepr_contracts::Citation,
        deepr_contracts::CostSummary,
        deepr_contracts::ErrorBody,
        jobs::CreateJobRequest,
        jobs::CreateJobResponse,
        jobs::ResultResponse,
        campaigns::CreateCampaignRequest,
        experts::CreateExpertRequest,
        experts::DocumentUpload,
        experts::SynthesiseResponse,
        experts::QueryRequest,
        experts::LearnRequest,
        experts::LearnResponse,
        experts::GapRequest,
        experts::FillGapRequest,
        experts::FillGapResponse,
    )),
    tags(
        (name = "jobs", description = "Research job endpoints"),
        (name = "campaigns", description = "Campaign orchestration endpoints"),
        (name = "experts", description = "Expert knowledge endpoints"),
        (name = "costs", description = "Budget reporting endpoints")
    ),
    info(
        title = "Deepr API",
        version = "0.2.0",
        description = "Local-first research automation engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

/// Build the full router; `/health` stays unauthenticated
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(jobs::routes(state.clone()))
        .merge(campaigns::routes(state.clone()))
        .merge(experts::routes(state.clone()))
        .merge(costs::routes(state.clone()))
        .merge(ws::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

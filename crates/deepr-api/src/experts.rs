// Expert HTTP routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use deepr_contracts::{Belief, Expert, ExpertAnswer, Gap};
use deepr_core::docstore::Document;

use crate::common::ApiError;
use crate::AppState;

/// Plain-text document upload
#[derive(Debug, Deserialize, ToSchema)]
pub struct DocumentUpload {
    pub name: String,
    pub content: String,
    pub mime: Option<String>,
}

impl From<DocumentUpload> for Document {
    fn from(upload: DocumentUpload) -> Self {
        Document {
            name: upload.name,
            bytes: upload.content.into_bytes(),
            mime: upload.mime.unwrap_or_else(|| "text/plain".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateExpertRequest {
    pub name: String,
    pub domain_description: String,
    #[serde(default)]
    pub initial_documents: Vec<DocumentUpload>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub question: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LearnRequest {
    pub budget: f64,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LearnResponse {
    pub status: &'static str,
    pub expert: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SynthesiseResponse {
    pub synthesis_job_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GapRequest {
    pub topic: String,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FillGapRequest {
    pub budget: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FillGapResponse {
    pub campaign_id: Uuid,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/experts", get(list_experts).post(create_expert))
        .route("/experts/:name", get(get_expert))
        .route("/experts/:name/beliefs", get(get_beliefs))
        .route("/experts/:name/documents", post(upload_documents))
        .route("/experts/:name/synthesise", post(synthesise))
        .route("/experts/:name/query", post(query_expert))
        .route("/experts/:name/learn", post(learn))
        .route("/experts/:name/gaps", get(get_gaps).post(record_gap))
        .route("/experts/:name/gaps/:gap_id/fill", post(fill_gap))
        .with_state(state)
}

/// POST /experts - Create an expert
#[utoipa::path(
    post,
    path = "/experts",
    request_body = CreateExpertRequest,
    responses(
        (status = 201, description = "Expert created", body = Expert),
        (status = 400, description = "Invalid request")
    ),
    tag = "experts"
)]
pub async fn create_expert(
    State(state): State<AppState>,
    Json(req): Json<CreateExpertRequest>,
) -> Result<(StatusCode, Json<Expert>), ApiError> {
    let documents = req.initial_documents.into_iter().map(Into::into).collect();
    let expert = state
        .engine
        .create_expert(&req.name, &req.domain_description, documents)
        .await?;
    Ok((StatusCode::CREATED, Json(expert)))
}

/// GET /experts - List experts
#[utoipa::path(
    get,
    path = "/experts",
    responses((status = 200, description = "List of experts", body = Vec<Expert>)),
    tag = "experts"
)]
pub async fn list_experts(State(state): State<AppState>) -> Result<Json<Vec<Expert>>, ApiError> {
    Ok(Json(state.engine.list_experts().await?))
}

/// GET /experts/:name
#[utoipa::path(
    get,
    path = "/experts/{name}",
    params(("name" = String, Path, description = "Expert name")),
    responses(
        (status = 200, description = "Expert found", body = Expert),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn get_expert(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Expert>, ApiError> {
    Ok(Json(state.engine.get_expert(&name).await?))
}

/// GET /experts/:name/beliefs - Full belief history with supersession links
#[utoipa::path(
    get,
    path = "/experts/{name}/beliefs",
    params(("name" = String, Path, description = "Expert name")),
    responses(
        (status = 200, description = "Belief history", body = Vec<Belief>),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn get_beliefs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Belief>>, ApiError> {
    Ok(Json(state.engine.expert_beliefs(&name).await?))
}

/// POST /experts/:name/documents - Upload documents and schedule synthesis
#[utoipa::path(
    post,
    path = "/experts/{name}/documents",
    params(("name" = String, Path, description = "Expert name")),
    request_body = Vec<DocumentUpload>,
    responses(
        (status = 202, description = "Documents stored, synthesis scheduled"),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn upload_documents(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(documents): Json<Vec<DocumentUpload>>,
) -> Result<StatusCode, ApiError> {
    let documents = documents.into_iter().map(Into::into).collect();
    state.engine.upload_documents(&name, documents).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /experts/:name/synthesise - Re-derive beliefs from the corpus
#[utoipa::path(
    post,
    path = "/experts/{name}/synthesise",
    params(("name" = String, Path, description = "Expert name")),
    responses(
        (status = 202, description = "Synthesis scheduled", body = SynthesiseResponse),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn synthesise(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<SynthesiseResponse>), ApiError> {
    let synthesis_job_id = state.engine.synthesise_expert(&name).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SynthesiseResponse { synthesis_job_id }),
    ))
}

/// POST /experts/:name/query - Grounded answer
#[utoipa::path(
    post,
    path = "/experts/{name}/query",
    params(("name" = String, Path, description = "Expert name")),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Grounded answer", body = ExpertAnswer),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn query_expert(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ExpertAnswer>, ApiError> {
    Ok(Json(state.engine.query_expert(&name, &req.question).await?))
}

/// POST /experts/:name/learn - Trigger the autonomous loop
#[utoipa::path(
    post,
    path = "/experts/{name}/learn",
    params(("name" = String, Path, description = "Expert name")),
    request_body = LearnRequest,
    responses(
        (status = 202, description = "Learning started", body = LearnResponse),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn learn(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<LearnRequest>,
) -> Result<(StatusCode, Json<LearnResponse>), ApiError> {
    // Validate the expert before detaching the run
    state.engine.get_expert(&name).await?;

    let engine = state.engine.clone();
    let expert = name.clone();
    let top_k = req.top_k.unwrap_or(3);
    tokio::spawn(async move {
        if let Err(err) = engine.learn(&expert, req.budget, top_k).await {
            error!(expert = %expert, error = %err, "Learning run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(LearnResponse {
            status: "started",
            expert: name,
        }),
    ))
}

/// GET /experts/:name/gaps
#[utoipa::path(
    get,
    path = "/experts/{name}/gaps",
    params(("name" = String, Path, description = "Expert name")),
    responses(
        (status = 200, description = "Known gaps, open and filled", body = Vec<Gap>),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn get_gaps(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Gap>>, ApiError> {
    Ok(Json(state.engine.expert_gaps(&name).await?))
}

/// POST /experts/:name/gaps - Record a gap (idempotent by topic)
#[utoipa::path(
    post,
    path = "/experts/{name}/gaps",
    params(("name" = String, Path, description = "Expert name")),
    request_body = GapRequest,
    responses(
        (status = 201, description = "Gap recorded (or already known)", body = Gap),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn record_gap(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<GapRequest>,
) -> Result<(StatusCode, Json<Gap>), ApiError> {
    let gap = state
        .engine
        .record_gap(&name, &req.topic, req.priority.unwrap_or(3))
        .await?;
    Ok((StatusCode::CREATED, Json(gap)))
}

/// POST /experts/:name/gaps/:gap_id/fill - Research one gap
#[utoipa::path(
    post,
    path = "/experts/{name}/gaps/{gap_id}/fill",
    params(
        ("name" = String, Path, description = "Expert name"),
        ("gap_id" = Uuid, Path, description = "Gap ID")
    ),
    request_body = FillGapRequest,
    responses(
        (status = 202, description = "Gap campaign started", body = FillGapResponse),
        (status = 400, description = "Gap does not belong to this expert"),
        (status = 404, description = "Expert not found")
    ),
    tag = "experts"
)]
pub async fn fill_gap(
    State(state): State<AppState>,
    Path((name, gap_id)): Path<(String, Uuid)>,
    Json(req): Json<FillGapRequest>,
) -> Result<(StatusCode, Json<FillGapResponse>), ApiError> {
    let campaign_id = state.engine.fill_gap(&name, gap_id, req.budget).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(FillGapResponse { campaign_id }),
    ))
}

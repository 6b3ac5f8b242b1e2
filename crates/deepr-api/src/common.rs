// HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use deepr_contracts::ErrorKind;
use deepr_core::DeeprError;

/// Wrapper turning engine errors into `{code, message, retry_hint?, ...}`
/// bodies with a taxonomy-derived status code
pub struct ApiError(pub DeeprError);

impl From<DeeprError> for ApiError {
    fn from(err: DeeprError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            Some(
                ErrorKind::JobNotFound | ErrorKind::ExpertNotFound | ErrorKind::CampaignNotFound,
            ) => StatusCode::NOT_FOUND,
            Some(ErrorKind::AlreadyTerminal | ErrorKind::PauseNotApplicable) => {
                StatusCode::CONFLICT
            }
            Some(
                ErrorKind::InvalidPrompt
                | ErrorKind::UnknownModel
                | ErrorKind::UnknownProvider
                | ErrorKind::BudgetTooLow
                | ErrorKind::InvalidRequest,
            ) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::BudgetExceeded | ErrorKind::RequiresElicitation) => {
                StatusCode::PAYMENT_REQUIRED
            }
            Some(ErrorKind::Auth) => StatusCode::UNAUTHORIZED,
            Some(
                ErrorKind::RateLimited
                | ErrorKind::Provider5xx
                | ErrorKind::Network
                | ErrorKind::ProviderLostJob,
            ) => StatusCode::BAD_GATEWAY,
            Some(ErrorKind::SubmitTimeout) => StatusCode::GATEWAY_TIMEOUT,
            Some(ErrorKind::StuckJobFlag) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        (status, Json(self.0.to_body())).into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AbilityError {
    #[error("No account for subject `{0}`")]
    #[diagnostic(
        code(penumbra::ability::user_not_found),
        help("The subject has no user record; abilities can only be built for existing accounts")
    )]
    UserNotFound(String),

    #[error("Permission rules unavailable: {0}")]
    #[diagnostic(
        code(penumbra::ability::data_unavailable),
        help("Check database connectivity; rule loading must complete within the configured timeout")
    )]
    DataUnavailable(String),

    #[error("Unknown action `{0}`")]
    #[diagnostic(
        code(penumbra::ability::unknown_action),
        help("Supported actions: create, read, update, delete, manage (alias: all)")
    )]
    UnknownAction(String),

    #[error("Invalid conditions: {0}")]
    #[diagnostic(
        code(penumbra::ability::invalid_conditions),
        help("Conditions map field names to plain values or operator objects. Supported operators: $eq, $ne, $in, $nin, $gt, $gte, $lt, $lte")
    )]
    InvalidConditions(String),
}

impl IntoResponse for AbilityError {
    fn into_response(self) -> Response {
        // Account-existence details never reach the response body: a missing
        // user is indistinguishable from a missing session.
        let (status, message) = match &self {
            AbilityError::UserNotFound(_) => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized - Please login".to_string(),
            ),
            AbilityError::DataUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch permissions".to_string(),
            ),
            AbilityError::UnknownAction(_) | AbilityError::InvalidConditions(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

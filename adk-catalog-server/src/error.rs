use adk_catalog::CatalogError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

/// A [`CatalogError`] rendered as `{ "error": <message> }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub CatalogError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::CollectionNotFound(_) | CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::DuplicateCollection(_) | CatalogError::DuplicateKey(_) => StatusCode::CONFLICT,
            CatalogError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CatalogError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

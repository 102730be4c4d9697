//! HTTP error mapping for the bridge API.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::sil::BridgeError;
use crate::sil::protocol::InvalidPowerMode;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request carried a value outside an enumerated set.
    #[error(transparent)]
    InvalidPowerMode(#[from] InvalidPowerMode),

    /// The request body could not be parsed.
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),

    /// A path segment could not be parsed.
    #[error("{}", .0.body_text())]
    Path(#[from] PathRejection),

    #[error("{}", .0.body_text())]
    Query(#[from] QueryRejection),

    /// The bridge or its store failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidPowerMode(_) => StatusCode::BAD_REQUEST,
            Self::Body(rejection) => rejection.status(),
            Self::Path(rejection) => rejection.status(),
            Self::Query(rejection) => rejection.status(),
            Self::Bridge(BridgeError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

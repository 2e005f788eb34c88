use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use snafu::Snafu;

use crate::refresh::RefreshError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("invalid request body: {}", source.body_text()))]
    InvalidBody { source: JsonRejection },

    #[snafu(transparent)]
    Refresh { source: RefreshError },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            ApiError::Refresh { source } if source.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Refresh { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use insight_core::{AnalyzerError, StoreError};
use serde_json::json;

/// Errors returned by HTTP handlers, rendered as `{success: false, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("AI分析失败: {0}")]
    Upstream(String),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        source: StoreError,
    },
}

impl ApiError {
    pub fn store(context: &'static str, source: StoreError) -> Self {
        Self::Store { context, source }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AnalyzerError> for ApiError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::Validation(message) => Self::InvalidInput(message),
            AnalyzerError::Backend(err) => Self::Upstream(err.to_string()),
            AnalyzerError::Config(message) => Self::Upstream(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "success": false,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

use stratus_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("experiment not found: {0}")]
    NotFound(usize),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl ApiError {
    /// Lifts a missing-index core error into [`ApiError::NotFound`].
    pub fn from_core(e: CoreError) -> Self {
        match e {
            CoreError::NoSuchExperiment(i) => ApiError::NotFound(i),
            other => ApiError::Core(other),
        }
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::Core(CoreError::NoSuchExperiment(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Core(CoreError::Teardown { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "api request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

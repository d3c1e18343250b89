use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ingest::{PipelineError, Stage};
use serde_json::json;
use store::StoreError;
use tracing::{error, warn};

/// JSON error body: `{ "error": message, "stage": stage? }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub stage: Option<Stage>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            stage: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let stage = err.stage();
        let status = match stage {
            Stage::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        warn!("upload rejected at {stage}: {err}");
        ApiError::new(status, err.to_string()).at(stage)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownLayer(_) => ApiError::not_found(err.to_string()),
            other => {
                error!("store failure: {other}");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.stage {
            Some(stage) => json!({ "error": self.message, "stage": stage.as_str() }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

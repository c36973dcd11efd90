use crate::domain::errors::{PipelineError, QueryError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Error returned by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Query(QueryError::NotFound { .. }) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Query(QueryError::InvalidRange { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_RANGE")
            }
            ApiError::Query(QueryError::Unavailable(inner)) | ApiError::Pipeline(inner) => {
                match inner {
                    PipelineError::Configuration(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    PipelineError::Connectivity { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
                    }
                    PipelineError::LateTick { .. } | PipelineError::InvalidTick { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let body = Json(json!({
            "error": code,
            "message": self.to_string()
        }));

        (status, body).into_response()
    }
}

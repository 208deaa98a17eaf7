use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::ProviderError;
use crate::planning::parser::InvalidAiResponse;

/// Everything that can stop the generation pipeline. None of these is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unsupported file format for '{file_name}' (.{extension}); use PDF, DOCX or TXT")]
    UnsupportedFormat { file_name: String, extension: String },

    #[error("Could not extract text from '{file_name}': {reason}")]
    ExtractionFailed { file_name: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    InvalidAiResponse(#[from] InvalidAiResponse),

    #[error("Spreadsheet template error: {0}")]
    Template(String),
}

impl PipelineError {
    /// Stable machine-readable code, used in HTTP bodies and batch failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::InvalidAiResponse(_) => "INVALID_AI_RESPONSE",
            Self::Template(_) => "TEMPLATE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ExtractionFailed { .. } | Self::InvalidAiResponse(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The session has no verified credential yet.
    #[error("{0}")]
    NotVerified(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotVerified(msg) => (StatusCode::CONFLICT, "NOT_VERIFIED", msg.clone()),
            AppError::Pipeline(e) => {
                let status = e.status();
                if status.is_server_error() {
                    tracing::error!("Pipeline error: {e}");
                } else {
                    tracing::warn!("Pipeline error: {e}");
                }
                (status, e.code(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

// src/errors.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

use crate::failure::{ErrorCategory, StageKind};
use crate::models::PipelineStage;

/// Failures of a single call to the generation service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Transport(String),

    #[error("Generation service returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Structured output malformed: {0}")]
    StructuredOutput(String),

    #[error("No image in response (finish reason: {})", .finish_reason.as_deref().unwrap_or("none"))]
    NoImageProduced {
        finish_reason: Option<String>,
        text: Option<String>,
    },

    #[error("Generation blocked by safety filter ({reason})")]
    SafetyBlocked { reason: String },

    #[error("Generation stopped without an image ({reason})")]
    UpstreamOther { reason: String },
}

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("{stage} failed ({category}): {message}")]
    StageFailed {
        stage: StageKind,
        category: ErrorCategory,
        message: String,
    },

    #[error("Operation '{operation}' is not allowed while the pipeline is {stage}")]
    IllegalStateTransition {
        operation: &'static str,
        stage: PipelineStage,
    },

    #[error("Another generation call is already in flight")]
    PipelineBusy,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ThumbnailError {
    /// The user-facing category, for errors that have one.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ThumbnailError::Encoding(_) => Some(ErrorCategory::EncodingFailed),
            ThumbnailError::StageFailed { category, .. } => Some(*category),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<StageKind> {
        match self {
            ThumbnailError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

const GENERIC_FAILURE: &str = "The request could not be completed. Please try again.";

impl ResponseError for ThumbnailError {
    fn status_code(&self) -> StatusCode {
        match self {
            ThumbnailError::Encoding(_) | ThumbnailError::Validation(_) => StatusCode::BAD_REQUEST,
            ThumbnailError::StageFailed {
                category: ErrorCategory::SafetyBlocked,
                ..
            } => StatusCode::UNPROCESSABLE_ENTITY,
            ThumbnailError::StageFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ThumbnailError::IllegalStateTransition { .. } | ThumbnailError::PipelineBusy => {
                StatusCode::CONFLICT
            }
            ThumbnailError::NotFound(_) => StatusCode::NOT_FOUND,
            ThumbnailError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ThumbnailError::Encoding(_) => HttpResponse::build(status).json(serde_json::json!({
                "error": "Image processing error",
                "category": ErrorCategory::EncodingFailed,
                "message": ErrorCategory::EncodingFailed.user_message()
            })),
            ThumbnailError::StageFailed {
                stage, category, ..
            } => HttpResponse::build(status).json(serde_json::json!({
                "error": format!("{stage} failed"),
                "stage": stage,
                "category": category,
                "message": category.user_message()
            })),
            ThumbnailError::IllegalStateTransition { .. } | ThumbnailError::PipelineBusy => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "Request rejected",
                    "message": GENERIC_FAILURE
                }))
            }
            ThumbnailError::Validation(_) => HttpResponse::build(status).json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            ThumbnailError::NotFound(_) => HttpResponse::build(status).json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
            ThumbnailError::Config(_) => HttpResponse::build(status).json(serde_json::json!({
                "error": "Server misconfigured",
                "message": GENERIC_FAILURE
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_hide_internal_state() {
        let err = ThumbnailError::IllegalStateTransition {
            operation: "finalize",
            stage: PipelineStage::Idle,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.category(), None);

        let busy = ThumbnailError::PipelineBusy;
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn safety_blocks_are_unprocessable() {
        let err = ThumbnailError::StageFailed {
            stage: StageKind::Refine,
            category: ErrorCategory::SafetyBlocked,
            message: "blocked".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.category(), Some(ErrorCategory::SafetyBlocked));
        assert_eq!(err.stage(), Some(StageKind::Refine));
    }

    #[test]
    fn no_image_message_names_the_finish_reason() {
        let err = GenerationError::NoImageProduced {
            finish_reason: Some("STOP".to_string()),
            text: None,
        };
        assert!(err.to_string().contains("STOP"));
    }
}

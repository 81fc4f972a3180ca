// src/failure.rs
//! Maps raw generation failures onto the user-facing error taxonomy.
//!
//! Every failure that leaves the pipeline goes through [`classify`], so the
//! presentation layer only ever sees an [`ErrorCategory`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{GenerationError, ThumbnailError};
use crate::services::generation::FinishReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SafetyBlocked,
    NoImageProduced,
    AmbiguousUpstreamFailure,
    StructuredOutputMalformed,
    EncodingFailed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::SafetyBlocked => "safety_blocked",
            ErrorCategory::NoImageProduced => "no_image_produced",
            ErrorCategory::AmbiguousUpstreamFailure => "ambiguous_upstream_failure",
            ErrorCategory::StructuredOutputMalformed => "structured_output_malformed",
            ErrorCategory::EncodingFailed => "encoding_failed",
        }
    }

    /// Copy shown to the end user for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::SafetyBlocked => {
                "The image service declined this request on content-policy grounds. Try a different photo or different wording."
            }
            ErrorCategory::NoImageProduced | ErrorCategory::AmbiguousUpstreamFailure => {
                "The image engine could not produce a result. Try a simpler title or a different photo."
            }
            ErrorCategory::StructuredOutputMalformed => {
                "Could not generate a visual strategy. Please run the generation again."
            }
            ErrorCategory::EncodingFailed => {
                "Could not process file. Please try another image (PNG, JPG or WEBP up to 10MB)."
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Ideation,
    Sketch,
    Refine,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Ideation => "Strategy generation",
            StageKind::Sketch => "Sketch render",
            StageKind::Refine => "Refine render",
        })
    }
}

/// Recorded outcome of a failed stage, kept in the pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub category: ErrorCategory,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl StageFailure {
    pub fn from_generation(stage: StageKind, error: &GenerationError) -> Self {
        Self {
            stage,
            category: classify(error),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    /// The caller dropped the transition before the service answered.
    pub fn abandoned(stage: StageKind) -> Self {
        Self {
            stage,
            category: ErrorCategory::AmbiguousUpstreamFailure,
            message: "Abandoned before the generation service answered".to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn to_error(&self) -> ThumbnailError {
        ThumbnailError::StageFailed {
            stage: self.stage,
            category: self.category,
            message: self.message.clone(),
        }
    }
}

pub fn classify(error: &GenerationError) -> ErrorCategory {
    match error {
        GenerationError::StructuredOutput(_) => ErrorCategory::StructuredOutputMalformed,
        GenerationError::SafetyBlocked { .. } => ErrorCategory::SafetyBlocked,
        GenerationError::NoImageProduced { .. } => ErrorCategory::NoImageProduced,
        GenerationError::Transport(_)
        | GenerationError::Upstream { .. }
        | GenerationError::UpstreamOther { .. } => ErrorCategory::AmbiguousUpstreamFailure,
    }
}

/// Builds the error for a response that carried no image.
///
/// A prompt-level block reason wins over the candidate's finish reason; a
/// normal completion means the service answered in text only (often a
/// refusal), and anything else is ambiguous.
pub fn missing_image_error(
    finish_reason: Option<&FinishReason>,
    block_reason: Option<&str>,
    text: Option<String>,
) -> GenerationError {
    if let Some(reason) = block_reason {
        return GenerationError::SafetyBlocked {
            reason: reason.to_string(),
        };
    }

    match finish_reason {
        Some(FinishReason::Safety(raw)) => GenerationError::SafetyBlocked {
            reason: raw.clone(),
        },
        Some(FinishReason::Stop) => GenerationError::NoImageProduced {
            finish_reason: Some(FinishReason::Stop.as_str().to_string()),
            text,
        },
        Some(FinishReason::Other(raw)) => GenerationError::UpstreamOther {
            reason: raw.clone(),
        },
        None => GenerationError::UpstreamOther {
            reason: "unspecified".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_http_failures_are_ambiguous() {
        assert_eq!(
            classify(&GenerationError::Transport("timeout".into())),
            ErrorCategory::AmbiguousUpstreamFailure
        );
        assert_eq!(
            classify(&GenerationError::Upstream {
                status: 500,
                message: "boom".into()
            }),
            ErrorCategory::AmbiguousUpstreamFailure
        );
    }

    #[test]
    fn safety_finish_reason_classifies_as_safety_blocked() {
        let err = missing_image_error(Some(&FinishReason::from("SAFETY".to_string())), None, None);
        assert_eq!(classify(&err), ErrorCategory::SafetyBlocked);

        let err = missing_image_error(
            Some(&FinishReason::from("IMAGE_SAFETY".to_string())),
            None,
            None,
        );
        assert_eq!(classify(&err), ErrorCategory::SafetyBlocked);
    }

    #[test]
    fn prompt_block_reason_wins_over_finish_reason() {
        let err = missing_image_error(None, Some("PROHIBITED_CONTENT"), None);
        assert_eq!(classify(&err), ErrorCategory::SafetyBlocked);
    }

    #[test]
    fn text_only_completion_is_no_image() {
        let err = missing_image_error(
            Some(&FinishReason::Stop),
            None,
            Some("I can't help with that.".into()),
        );
        assert_eq!(classify(&err), ErrorCategory::NoImageProduced);
        match err {
            GenerationError::NoImageProduced { text, .. } => {
                assert_eq!(text.as_deref(), Some("I can't help with that."))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_or_missing_reasons_are_ambiguous() {
        let err = missing_image_error(Some(&FinishReason::from("OTHER".to_string())), None, None);
        assert_eq!(classify(&err), ErrorCategory::AmbiguousUpstreamFailure);

        let err = missing_image_error(None, None, None);
        assert_eq!(classify(&err), ErrorCategory::AmbiguousUpstreamFailure);
    }

    #[test]
    fn stage_failure_converts_back_to_error() {
        let failure = StageFailure::from_generation(
            StageKind::Sketch,
            &GenerationError::SafetyBlocked {
                reason: "SAFETY".into(),
            },
        );
        let err = failure.to_error();
        assert_eq!(err.category(), Some(ErrorCategory::SafetyBlocked));
        assert_eq!(err.stage(), Some(StageKind::Sketch));
    }
}

//! Thumbnail generation pipeline.
//!
//! Turns an identity photo plus a title or article into a finished thumbnail by
//! driving an external multimodal generation service through ideation, sketch,
//! refine and an optional critique pass. The [`pipeline::PipelineController`]
//! owns the per-session state machine; everything else is plumbing around it.

pub mod config;
pub mod errors;
pub mod failure;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod services;
pub mod sessions;

pub use errors::{GenerationError, ThumbnailError};
pub use failure::{ErrorCategory, StageFailure, StageKind};
pub use pipeline::{PipelineController, StartRequest};

// src/pipeline/progress.rs
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PipelineStage;

pub const STRATEGIZING: &str = "Strategizing visual impact...";
pub const DRAFTING: &str = "Drafting compositional guide...";
pub const RENDERING: &str = "Rendering masterpiece draft...";
pub const CRITIQUING: &str = "Critiquing likeness and polishing realism...";

/// Emitted once at the start of every stage. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub label: &'static str,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn starting(stage: PipelineStage) -> Option<Self> {
        let label = match stage {
            PipelineStage::Strategizing => STRATEGIZING,
            PipelineStage::SketchDrafting => DRAFTING,
            PipelineStage::Refining => RENDERING,
            PipelineStage::Critiquing => CRITIQUING,
            _ => return None,
        };
        Some(Self {
            stage,
            label,
            at: Utc::now(),
        })
    }
}

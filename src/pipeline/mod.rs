// src/pipeline/mod.rs
pub mod controller;
pub mod progress;
pub mod stages;

pub use controller::{MAX_BRAND_ASSETS, PipelineController, PipelineState, StartRequest};
pub use progress::ProgressEvent;
pub use stages::{Orchestrator, RefineInputs};

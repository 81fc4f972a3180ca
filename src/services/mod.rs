// src/services/mod.rs
pub mod gemini;
pub mod generation;
pub mod image_encoder;

pub use gemini::GeminiService;
pub use generation::{GenerationClient, GenerationService};
pub use image_encoder::ImageEncoder;

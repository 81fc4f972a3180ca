// src/models.rs
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ThumbnailError;
use crate::failure::StageFailure;
use crate::services::generation::{FieldType, ResponseSchema, SchemaField, StructuredOutput};

pub const ACCEPTED_MEDIA_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// Base64 image payload as it travels to and from the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub data: String,
    pub media_type: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self {
            data: general_purpose::STANDARD.encode(bytes),
            media_type: media_type.into(),
        }
    }

    pub fn decode(&self) -> Result<Bytes, ThumbnailError> {
        general_purpose::STANDARD
            .decode(&self.data)
            .map(Bytes::from)
            .map_err(|e| ThumbnailError::Encoding(format!("Invalid base64 payload: {}", e)))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailMetadata {
    pub visual_description: String,
    pub clickbait_text: String,
    pub props: Vec<String>,
    pub background_context: String,
    pub visual_hooks: Vec<String>,
}

impl StructuredOutput for ThumbnailMetadata {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(vec![
            SchemaField::new("visual_hooks", FieldType::StringArray),
            SchemaField::new("visual_description", FieldType::String),
            SchemaField::new("clickbait_text", FieldType::String),
            SchemaField::new("props", FieldType::StringArray),
            SchemaField::new("background_context", FieldType::String),
        ])
    }

    fn validate(&self) -> Result<(), String> {
        if self.clickbait_text.trim().is_empty() {
            return Err("clickbait_text is empty".to_string());
        }
        if self.visual_hooks.is_empty() {
            return Err("visual_hooks is empty".to_string());
        }
        Ok(())
    }
}

/// A single user edit to held metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetadataEdit {
    SetVisualDescription { value: String },
    SetClickbaitText { value: String },
    SetBackgroundContext { value: String },
    AddProp { value: String },
    RemoveProp { index: usize },
    AddVisualHook { value: String },
    RemoveVisualHook { index: usize },
}

impl ThumbnailMetadata {
    pub fn apply(&mut self, edit: MetadataEdit) -> Result<(), ThumbnailError> {
        match edit {
            MetadataEdit::SetVisualDescription { value } => self.visual_description = value,
            MetadataEdit::SetClickbaitText { value } => self.clickbait_text = value,
            MetadataEdit::SetBackgroundContext { value } => self.background_context = value,
            MetadataEdit::AddProp { value } => self.props.push(value),
            MetadataEdit::RemoveProp { index } => remove_entry(&mut self.props, index, "props")?,
            MetadataEdit::AddVisualHook { value } => self.visual_hooks.push(value),
            MetadataEdit::RemoveVisualHook { index } => {
                remove_entry(&mut self.visual_hooks, index, "visual_hooks")?
            }
        }
        Ok(())
    }
}

fn remove_entry(list: &mut Vec<String>, index: usize, field: &str) -> Result<(), ThumbnailError> {
    if index >= list.len() {
        return Err(ThumbnailError::Validation(format!(
            "{} has no entry at index {}",
            field, index
        )));
    }
    list.remove(index);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GenerationStyle {
    #[default]
    Professional,
    Casual,
    Cinematic,
    #[serde(rename = "3D Render")]
    Render3d,
    #[serde(rename = "Comic Book")]
    ComicBook,
    Retro,
    #[serde(rename = "Hyper-Realistic")]
    HyperRealistic,
}

impl GenerationStyle {
    pub const ALL: [GenerationStyle; 7] = [
        GenerationStyle::Professional,
        GenerationStyle::Casual,
        GenerationStyle::Cinematic,
        GenerationStyle::Render3d,
        GenerationStyle::ComicBook,
        GenerationStyle::Retro,
        GenerationStyle::HyperRealistic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GenerationStyle::Professional => "Professional",
            GenerationStyle::Casual => "Casual",
            GenerationStyle::Cinematic => "Cinematic",
            GenerationStyle::Render3d => "3D Render",
            GenerationStyle::ComicBook => "Comic Book",
            GenerationStyle::Retro => "Retro",
            GenerationStyle::HyperRealistic => "Hyper-Realistic",
        }
    }

    /// Unknown labels fall back to `Professional`.
    pub fn from_label(label: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|style| style.label().eq_ignore_ascii_case(label.trim()))
            .unwrap_or_default()
    }

    pub fn prompt_fragment(&self) -> &'static str {
        match self {
            GenerationStyle::Professional => {
                "premium commercial photograph, sharp focus, professional lighting, vibrant color balance."
            }
            GenerationStyle::Casual => {
                "realistic vlog-style photography, natural sunlight, authentic details."
            }
            GenerationStyle::Cinematic => {
                "epic cinematic film still, moody rim lighting, deep contrast."
            }
            GenerationStyle::Render3d => {
                "high-detail 3D digital render, realistic materials, octane render style."
            }
            GenerationStyle::ComicBook => {
                "vibrant digital illustration, dynamic linework, high-contrast colors."
            }
            GenerationStyle::Retro => {
                "vintage film photograph, warm film grain, nostalgic lighting."
            }
            GenerationStyle::HyperRealistic => {
                "ultra-realistic 8k masterwork photograph, hyper-realistic skin textures, pore-level detail, masterfully lit cinematic environment with perfect depth of field."
            }
        }
    }

    pub fn is_illustrated(&self) -> bool {
        matches!(self, GenerationStyle::ComicBook)
    }
}

impl fmt::Display for GenerationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub name: String,
    pub colors: Vec<String>,
}

impl ColorPalette {
    pub fn new(name: impl Into<String>, colors: &[&str]) -> Self {
        Self {
            name: name.into(),
            colors: colors.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn presets() -> Vec<ColorPalette> {
        vec![
            ColorPalette::new("Vibrant", &["#FF3E3E", "#FFC107", "#00D1FF", "#FFFFFF"]),
            ColorPalette::new("Neon", &["#39FF14", "#FF40E3", "#00FFFF", "#FDFD96"]),
            ColorPalette::new("Pastel", &["#A0E7E5", "#F8C8DC", "#B4F8C8", "#FFAEBC"]),
            ColorPalette::new("Monochrome", &["#1C1C1C", "#585858", "#D8D8D8", "#FFFFFF"]),
            ColorPalette::new("Earthy", &["#A87B00", "#568203", "#4E2A04", "#C2B280"]),
            ColorPalette::new("Sunset", &["#F65B49", "#F9A825", "#FFD54F", "#4A148C"]),
        ]
    }

    pub fn preset(name: &str) -> Option<ColorPalette> {
        Self::presets()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FontStyle {
    #[default]
    Impact,
    #[serde(rename = "Bebas Neue")]
    BebasNeue,
    Anton,
    Montserrat,
    Bangers,
}

impl FontStyle {
    pub fn label(&self) -> &'static str {
        match self {
            FontStyle::Impact => "Impact",
            FontStyle::BebasNeue => "Bebas Neue",
            FontStyle::Anton => "Anton",
            FontStyle::Montserrat => "Montserrat",
            FontStyle::Bangers => "Bangers",
        }
    }
}

impl fmt::Display for FontStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The text the ideation stage works from. Exactly one path is ever used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentContext {
    Headline { title: String, subtitle: String },
    Article { content: String },
}

impl ContentContext {
    /// Article text takes precedence over title and subtitle. Text is kept
    /// verbatim so the service can detect its language.
    pub fn from_inputs(title: &str, subtitle: &str, article: &str) -> Result<Self, ThumbnailError> {
        if !article.trim().is_empty() {
            return Ok(ContentContext::Article {
                content: article.to_string(),
            });
        }
        if !title.trim().is_empty() {
            return Ok(ContentContext::Headline {
                title: title.to_string(),
                subtitle: subtitle.to_string(),
            });
        }
        Err(ThumbnailError::Validation(
            "Provide a title or article text".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Strategizing,
    SketchDrafting,
    SketchReady,
    Refining,
    Critiquing,
    Finalized,
    Failed,
}

impl PipelineStage {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PipelineStage::Strategizing
                | PipelineStage::SketchDrafting
                | PipelineStage::Refining
                | PipelineStage::Critiquing
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Strategizing => "strategizing",
            PipelineStage::SketchDrafting => "drafting a sketch",
            PipelineStage::SketchReady => "sketch-ready",
            PipelineStage::Refining => "refining",
            PipelineStage::Critiquing => "critiquing",
            PipelineStage::Finalized => "finalized",
            PipelineStage::Failed => "failed",
        })
    }
}

/// Result of a successful ideation or sketch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SketchReadyView {
    pub sketch: EncodedImage,
    pub metadata: ThumbnailMetadata,
}

/// Image-free view of a pipeline, cheap enough to hand to the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub stage: PipelineStage,
    pub resume_stage: PipelineStage,
    pub metadata: Option<ThumbnailMetadata>,
    pub has_sketch: bool,
    pub has_final_image: bool,
    pub brand_asset_count: usize,
    pub last_error: Option<StageFailure>,
    pub updated_at: DateTime<Utc>,
}

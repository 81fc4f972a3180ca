// src/services/generation.rs
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::errors::GenerationError;
use crate::failure::missing_image_error;
use crate::models::{AspectRatio, EncodedImage};

/// One piece of a multimodal request, in the order the service sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image(EncodedImage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    StringArray,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldType,
}

impl SchemaField {
    pub fn new(name: &'static str, kind: FieldType) -> Self {
        Self { name, kind }
    }
}

/// Object schema for structured output. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSchema {
    pub fields: Vec<SchemaField>,
}

impl ResponseSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

/// Either structured JSON or an image, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseConfig {
    Structured(ResponseSchema),
    Image { aspect_ratio: AspectRatio },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub parts: Vec<Part>,
    pub response: ResponseConfig,
}

impl GenerationRequest {
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Text(text) => Some(text.as_str()),
            Part::Image(_) => None,
        })
    }

    pub fn image_parts(&self) -> impl Iterator<Item = &EncodedImage> {
        self.parts.iter().filter_map(|p| match p {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }
}

/// Why a candidate stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Safety(String),
    Other(String),
}

const SAFETY_REASONS: [&str; 5] = ["SAFETY", "IMAGE_SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "STOP",
            FinishReason::Safety(raw) | FinishReason::Other(raw) => raw,
        }
    }
}

impl From<String> for FinishReason {
    fn from(raw: String) -> Self {
        if raw == "STOP" {
            FinishReason::Stop
        } else if SAFETY_REASONS.contains(&raw.as_str()) {
            FinishReason::Safety(raw)
        } else {
            FinishReason::Other(raw)
        }
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        reason.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

impl GenerationResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Concatenated text of the first candidate, if it has any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    /// First inline image of the first candidate.
    pub fn first_image(&self) -> Option<EncodedImage> {
        self.first_parts()
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .map(|inline| EncodedImage {
                data: inline.data.clone(),
                media_type: inline.mime_type.clone(),
            })
    }

    fn finish_reason(&self) -> Option<&FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason.as_ref())
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

/// The external generation service. The live implementation talks HTTP;
/// tests substitute a scripted one.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate_content(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;
}

/// Records that can be requested as structured output.
pub trait StructuredOutput: DeserializeOwned {
    fn schema() -> ResponseSchema;

    /// Checks beyond presence and type, run after deserializing.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Removes a surrounding markdown code fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

pub fn parse_structured<T: StructuredOutput>(text: &str) -> Result<T, GenerationError> {
    let record: T = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| GenerationError::StructuredOutput(format!("Failed to parse JSON: {}", e)))?;
    record
        .validate()
        .map_err(GenerationError::StructuredOutput)?;
    Ok(record)
}

/// Typed wrapper issuing exactly one service call per operation.
#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    models: ModelConfig,
}

impl GenerationClient {
    pub fn new(service: Arc<dyn GenerationService>, models: ModelConfig) -> Self {
        Self { service, models }
    }

    pub async fn generate_structured<T: StructuredOutput>(
        &self,
        prompt: &str,
    ) -> Result<T, GenerationError> {
        let request = GenerationRequest {
            model: self.models.strategy_model.clone(),
            parts: vec![Part::Text(prompt.to_string())],
            response: ResponseConfig::Structured(T::schema()),
        };

        let response = self.service.generate_content(&request).await?;
        let text = response.text().ok_or_else(|| {
            GenerationError::StructuredOutput("Response contained no text".to_string())
        })?;
        debug!("Structured response: {} bytes", text.len());

        parse_structured(&text)
    }

    pub async fn generate_image(
        &self,
        parts: Vec<Part>,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, GenerationError> {
        let request = GenerationRequest {
            model: self.models.image_model.clone(),
            parts,
            response: ResponseConfig::Image { aspect_ratio },
        };

        let response = self.service.generate_content(&request).await?;
        if let Some(image) = response.first_image() {
            return Ok(image);
        }

        let err = missing_image_error(
            response.finish_reason(),
            response.block_reason(),
            response.text(),
        );
        warn!("Image request returned no image: {}", err);
        Err(err)
    }
}

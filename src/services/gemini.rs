// src/services/gemini.rs
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Instant;

use crate::errors::GenerationError;
use crate::services::generation::{
    FieldType, GenerationRequest, GenerationResponse, GenerationService, Part, ResponseConfig,
    ResponseSchema,
};

/// Live generation service speaking the `generateContent` REST API.
pub struct GeminiService {
    api_key: String,
    api_base: String,
    client: Client,
}

impl GeminiService {
    pub fn new(api_key: String, api_base: impl Into<String>) -> Self {
        Self {
            api_key,
            api_base: api_base.into(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }
}

#[async_trait]
impl GenerationService for GeminiService {
    async fn generate_content(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let start = Instant::now();
        let body = request_body(request);

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(format!("Request to {} failed: {}", request.model, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: GenerationResponse = response.json().await.map_err(|e| {
            GenerationError::Upstream {
                status: status.as_u16(),
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        info!(
            "{} answered with {} candidate(s) in {}ms",
            request.model,
            parsed.candidates.len(),
            start.elapsed().as_millis()
        );
        Ok(parsed)
    }
}

pub fn request_body(request: &GenerationRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.media_type,
                    "data": image.data
                }
            }),
        })
        .collect();

    let generation_config = match &request.response {
        ResponseConfig::Structured(schema) => json!({
            "responseMimeType": "application/json",
            "responseSchema": schema_json(schema)
        }),
        ResponseConfig::Image { aspect_ratio } => json!({
            "responseModalities": ["IMAGE", "TEXT"],
            "imageConfig": { "aspectRatio": aspect_ratio.as_str() }
        }),
    };
    debug!("Built request with {} part(s)", parts.len());

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config
    })
}

fn schema_json(schema: &ResponseSchema) -> Value {
    let mut properties = Map::new();
    for field in &schema.fields {
        let ty = match field.kind {
            FieldType::String => json!({ "type": "STRING" }),
            FieldType::StringArray => json!({ "type": "ARRAY", "items": { "type": "STRING" } }),
        };
        properties.insert(field.name.to_string(), ty);
    }

    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": schema.required_fields()
    })
}

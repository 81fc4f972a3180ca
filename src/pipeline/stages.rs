// src/pipeline/stages.rs
//! One generation call per stage. Stateless: the controller decides what runs
//! when and what to do with the result.

use log::info;

use crate::errors::GenerationError;
use crate::models::{
    AspectRatio, ColorPalette, ContentContext, EncodedImage, FontStyle, GenerationStyle,
    ThumbnailMetadata,
};
use crate::prompts;
use crate::services::generation::{GenerationClient, Part};

pub struct RefineInputs<'a> {
    pub sketch: &'a EncodedImage,
    pub identity: &'a EncodedImage,
    pub brand_assets: &'a [EncodedImage],
    pub metadata: &'a ThumbnailMetadata,
    pub style: GenerationStyle,
    pub palette: Option<&'a ColorPalette>,
    pub font: FontStyle,
    pub aspect_ratio: AspectRatio,
}

#[derive(Clone)]
pub struct Orchestrator {
    client: GenerationClient,
}

impl Orchestrator {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }

    pub async fn run_ideation(
        &self,
        context: &ContentContext,
        style: GenerationStyle,
    ) -> Result<ThumbnailMetadata, GenerationError> {
        info!("Running ideation ({})", style);
        let prompt = prompts::ideation_prompt(context, style);
        self.client.generate_structured(&prompt).await
    }

    pub async fn run_sketch(
        &self,
        metadata: &ThumbnailMetadata,
        identity: &EncodedImage,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, GenerationError> {
        info!("Drafting sketch at {}", aspect_ratio);
        let parts = vec![
            Part::Image(identity.clone()),
            Part::Text(prompts::sketch_prompt(metadata, aspect_ratio)),
        ];
        self.client.generate_image(parts, aspect_ratio).await
    }

    pub async fn run_refine(&self, inputs: RefineInputs<'_>) -> Result<EncodedImage, GenerationError> {
        info!(
            "Refining sketch with {} brand asset(s), style {}",
            inputs.brand_assets.len(),
            inputs.style
        );
        let mut parts = Vec::with_capacity(inputs.brand_assets.len() + 3);
        parts.push(Part::Image(inputs.sketch.clone()));
        parts.push(Part::Image(inputs.identity.clone()));
        parts.extend(inputs.brand_assets.iter().cloned().map(Part::Image));
        parts.push(Part::Text(prompts::refine_prompt(
            inputs.metadata,
            inputs.style,
            inputs.palette,
            inputs.font,
            inputs.brand_assets.len(),
        )));
        self.client.generate_image(parts, inputs.aspect_ratio).await
    }

    pub async fn run_critique(
        &self,
        final_image: &EncodedImage,
        identity: &EncodedImage,
        metadata: &ThumbnailMetadata,
        style: GenerationStyle,
        aspect_ratio: AspectRatio,
    ) -> Result<EncodedImage, GenerationError> {
        info!("Critiquing final image");
        let parts = vec![
            Part::Image(final_image.clone()),
            Part::Image(identity.clone()),
            Part::Text(prompts::critique_prompt(metadata, style)),
        ];
        self.client.generate_image(parts, aspect_ratio).await
    }
}

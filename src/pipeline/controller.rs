// src/pipeline/controller.rs
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::errors::{GenerationError, ThumbnailError};
use crate::failure::{StageFailure, StageKind, classify};
use crate::models::{
    AspectRatio, ColorPalette, ContentContext, EncodedImage, FontStyle, GenerationStyle,
    MetadataEdit, PipelineSnapshot, PipelineStage, SketchReadyView, ThumbnailMetadata,
};
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::stages::{Orchestrator, RefineInputs};
use crate::services::generation::{GenerationClient, StructuredOutput};

pub const MAX_BRAND_ASSETS: usize = 2;
const PROGRESS_CAPACITY: usize = 16;

/// Inputs fixed for the whole run, from ideation onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub content: ContentContext,
    pub style: GenerationStyle,
    pub aspect_ratio: AspectRatio,
}

/// Everything a pipeline instance holds.
///
/// `SketchReady` implies `metadata` and `sketch` are set; `Finalized` also
/// implies `final_image`. While `Failed`, `resume_stage` names the stable
/// stage whose operations remain legal.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub stage: PipelineStage,
    pub resume_stage: PipelineStage,
    pub identity: EncodedImage,
    pub brand_assets: Vec<EncodedImage>,
    pub run: Option<StartRequest>,
    pub metadata: Option<ThumbnailMetadata>,
    pub sketch: Option<EncodedImage>,
    pub final_image: Option<EncodedImage>,
    pub last_error: Option<StageFailure>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    fn new(identity: EncodedImage, brand_assets: Vec<EncodedImage>) -> Self {
        Self {
            stage: PipelineStage::Idle,
            resume_stage: PipelineStage::Idle,
            identity,
            brand_assets,
            run: None,
            metadata: None,
            sketch: None,
            final_image: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn effective_stage(&self) -> PipelineStage {
        match self.stage {
            PipelineStage::Failed => self.resume_stage,
            stage => stage,
        }
    }

    fn ensure(&self, operation: &'static str, allowed: &[PipelineStage]) -> Result<(), ThumbnailError> {
        if allowed.contains(&self.effective_stage()) {
            Ok(())
        } else {
            Err(ThumbnailError::IllegalStateTransition {
                operation,
                stage: self.stage,
            })
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    fn settle(&mut self, stage: PipelineStage) {
        self.enter(stage);
        self.resume_stage = stage;
        self.last_error = None;
    }

    fn clear(&mut self) {
        self.run = None;
        self.metadata = None;
        self.sketch = None;
        self.final_image = None;
        self.last_error = None;
        self.settle(PipelineStage::Idle);
    }

    fn held<T: Clone>(
        &self,
        value: &Option<T>,
        operation: &'static str,
    ) -> Result<T, ThumbnailError> {
        value.clone().ok_or(ThumbnailError::IllegalStateTransition {
            operation,
            stage: self.stage,
        })
    }

    fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            stage: self.stage,
            resume_stage: self.resume_stage,
            metadata: self.metadata.clone(),
            has_sketch: self.sketch.is_some(),
            has_final_image: self.final_image.is_some(),
            brand_asset_count: self.brand_assets.len(),
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Marks the controller busy for one transition. If the future is dropped
/// while a stage is in flight, the stage is recorded as failed (an abandoned
/// critique keeps the current final image) so the marker never stays on an
/// in-flight stage.
struct InFlight<'a> {
    controller: &'a PipelineController,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.lock_state();
        let current = state.stage;
        match current {
            PipelineStage::Critiquing => {
                warn!("Critique abandoned, keeping the current final image");
                state.settle(PipelineStage::Finalized);
            }
            stage => {
                if let Some(kind) = running_stage(stage) {
                    warn!("{} abandoned while {}, resume at {}", kind, stage, state.resume_stage);
                    state.enter(PipelineStage::Failed);
                    state.last_error = Some(StageFailure::abandoned(kind));
                }
            }
        }
        drop(state);
        self.controller.busy.store(false, Ordering::Release);
    }
}

fn running_stage(stage: PipelineStage) -> Option<StageKind> {
    match stage {
        PipelineStage::Strategizing => Some(StageKind::Ideation),
        PipelineStage::SketchDrafting => Some(StageKind::Sketch),
        PipelineStage::Refining => Some(StageKind::Refine),
        _ => None,
    }
}

/// Owns one pipeline instance and exposes its legal transitions.
pub struct PipelineController {
    orchestrator: Orchestrator,
    state: Mutex<PipelineState>,
    busy: AtomicBool,
    progress: broadcast::Sender<ProgressEvent>,
}

impl PipelineController {
    /// Brand assets past [`MAX_BRAND_ASSETS`] are dropped.
    pub fn new(
        client: GenerationClient,
        identity: EncodedImage,
        mut brand_assets: Vec<EncodedImage>,
    ) -> Self {
        if brand_assets.len() > MAX_BRAND_ASSETS {
            warn!(
                "Ignoring {} brand asset(s) beyond the limit of {}",
                brand_assets.len() - MAX_BRAND_ASSETS,
                MAX_BRAND_ASSETS
            );
            brand_assets.truncate(MAX_BRAND_ASSETS);
        }
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        Self {
            orchestrator: Orchestrator::new(client),
            state: Mutex::new(PipelineState::new(identity, brand_assets)),
            busy: AtomicBool::new(false),
            progress,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn stage(&self) -> PipelineStage {
        self.lock_state().stage
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.lock_state().snapshot()
    }

    pub fn state(&self) -> PipelineState {
        self.lock_state().clone()
    }

    pub fn metadata(&self) -> Option<ThumbnailMetadata> {
        self.lock_state().metadata.clone()
    }

    pub fn sketch(&self) -> Option<EncodedImage> {
        self.lock_state().sketch.clone()
    }

    pub fn final_image(&self) -> Option<EncodedImage> {
        self.lock_state().final_image.clone()
    }

    pub fn identity_image(&self) -> EncodedImage {
        self.lock_state().identity.clone()
    }

    pub fn brand_assets(&self) -> Vec<EncodedImage> {
        self.lock_state().brand_assets.clone()
    }

    pub fn last_error(&self) -> Option<StageFailure> {
        self.lock_state().last_error.clone()
    }

    /// Ideation followed by the first sketch.
    pub async fn start_pipeline(&self, request: StartRequest) -> Result<SketchReadyView, ThumbnailError> {
        let _in_flight = self.begin()?;
        let identity = {
            let mut state = self.lock_state();
            state.ensure("start_pipeline", &[PipelineStage::Idle])?;
            state.last_error = None;
            state.run = Some(request.clone());
            state.enter(PipelineStage::Strategizing);
            state.identity.clone()
        };
        self.emit(PipelineStage::Strategizing);

        let metadata = match self
            .orchestrator
            .run_ideation(&request.content, request.style)
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => return Err(self.fail(StageKind::Ideation, &err)),
        };

        {
            let mut state = self.lock_state();
            state.metadata = Some(metadata.clone());
            state.resume_stage = PipelineStage::SketchDrafting;
        }

        self.draft_sketch(metadata, identity, request.aspect_ratio)
            .await
    }

    /// Re-runs the sketch stage with the held metadata, or with `edited`
    /// which then replaces it.
    pub async fn regenerate_sketch(
        &self,
        edited: Option<ThumbnailMetadata>,
    ) -> Result<SketchReadyView, ThumbnailError> {
        let _in_flight = self.begin()?;
        let (metadata, identity, aspect_ratio) = {
            let mut state = self.lock_state();
            state.ensure(
                "regenerate_sketch",
                &[PipelineStage::SketchDrafting, PipelineStage::SketchReady],
            )?;
            let run = state.held(&state.run, "regenerate_sketch")?;
            if let Some(edited) = edited {
                edited.validate().map_err(ThumbnailError::Validation)?;
                state.metadata = Some(edited);
            }
            let metadata = state.held(&state.metadata, "regenerate_sketch")?;
            (metadata, state.identity.clone(), run.aspect_ratio)
        };

        self.draft_sketch(metadata, identity, aspect_ratio).await
    }

    /// Applies one edit to the held metadata. The held sketch is left as is
    /// until the next [`regenerate_sketch`](Self::regenerate_sketch).
    pub fn edit_metadata_field(&self, edit: MetadataEdit) -> Result<ThumbnailMetadata, ThumbnailError> {
        let _in_flight = self.begin()?;
        let mut state = self.lock_state();
        state.ensure("edit_metadata_field", &[PipelineStage::SketchReady])?;
        let mut metadata = state.held(&state.metadata, "edit_metadata_field")?;
        metadata.apply(edit)?;
        metadata.validate().map_err(ThumbnailError::Validation)?;
        state.metadata = Some(metadata.clone());
        state.updated_at = Utc::now();
        Ok(metadata)
    }

    /// Renders the final image from the held sketch and metadata.
    pub async fn finalize(
        &self,
        palette: Option<ColorPalette>,
        font: FontStyle,
    ) -> Result<EncodedImage, ThumbnailError> {
        let _in_flight = self.begin()?;
        let (sketch, identity, brand_assets, metadata, run) = {
            let mut state = self.lock_state();
            state.ensure("finalize", &[PipelineStage::SketchReady])?;
            let held = (
                state.held(&state.sketch, "finalize")?,
                state.identity.clone(),
                state.brand_assets.clone(),
                state.held(&state.metadata, "finalize")?,
                state.held(&state.run, "finalize")?,
            );
            state.enter(PipelineStage::Refining);
            held
        };
        self.emit(PipelineStage::Refining);

        let result = self
            .orchestrator
            .run_refine(RefineInputs {
                sketch: &sketch,
                identity: &identity,
                brand_assets: &brand_assets,
                metadata: &metadata,
                style: run.style,
                palette: palette.as_ref(),
                font,
                aspect_ratio: run.aspect_ratio,
            })
            .await;

        match result {
            Ok(image) => {
                let mut state = self.lock_state();
                state.final_image = Some(image.clone());
                state.settle(PipelineStage::Finalized);
                info!("Pipeline finalized");
                Ok(image)
            }
            Err(err) => Err(self.fail(StageKind::Refine, &err)),
        }
    }

    /// Optional correction pass. A failed critique keeps the current final
    /// image; the only errors returned are caller-contract violations.
    pub async fn critique(&self) -> Result<EncodedImage, ThumbnailError> {
        let _in_flight = self.begin()?;
        let (final_image, identity, metadata, run) = {
            let mut state = self.lock_state();
            state.ensure("critique", &[PipelineStage::Finalized])?;
            let held = (
                state.held(&state.final_image, "critique")?,
                state.identity.clone(),
                state.held(&state.metadata, "critique")?,
                state.held(&state.run, "critique")?,
            );
            state.enter(PipelineStage::Critiquing);
            held
        };
        self.emit(PipelineStage::Critiquing);

        let result = self
            .orchestrator
            .run_critique(&final_image, &identity, &metadata, run.style, run.aspect_ratio)
            .await;

        let mut state = self.lock_state();
        match result {
            Ok(corrected) => {
                state.final_image = Some(corrected.clone());
                state.settle(PipelineStage::Finalized);
                Ok(corrected)
            }
            Err(err) => {
                warn!(
                    "Critique failed ({}), keeping the pre-critique image: {}",
                    classify(&err),
                    err
                );
                state.settle(PipelineStage::Finalized);
                Ok(final_image)
            }
        }
    }

    /// Back to `Idle`. The identity image and brand assets are kept.
    pub fn reset(&self) -> Result<(), ThumbnailError> {
        let _in_flight = self.begin()?;
        self.lock_state().clear();
        info!("Pipeline reset");
        Ok(())
    }

    /// Ideation, sketch and refine in one go.
    pub async fn run_single_pass(
        &self,
        request: StartRequest,
        palette: Option<ColorPalette>,
        font: FontStyle,
    ) -> Result<EncodedImage, ThumbnailError> {
        self.start_pipeline(request).await?;
        self.finalize(palette, font).await
    }

    /// [`run_single_pass`](Self::run_single_pass) plus the critique pass.
    pub async fn run_three_stage(
        &self,
        request: StartRequest,
        palette: Option<ColorPalette>,
        font: FontStyle,
    ) -> Result<EncodedImage, ThumbnailError> {
        self.run_single_pass(request, palette, font).await?;
        self.critique().await
    }

    async fn draft_sketch(
        &self,
        metadata: ThumbnailMetadata,
        identity: EncodedImage,
        aspect_ratio: AspectRatio,
    ) -> Result<SketchReadyView, ThumbnailError> {
        self.lock_state().enter(PipelineStage::SketchDrafting);
        self.emit(PipelineStage::SketchDrafting);

        match self
            .orchestrator
            .run_sketch(&metadata, &identity, aspect_ratio)
            .await
        {
            Ok(sketch) => {
                let mut state = self.lock_state();
                state.sketch = Some(sketch.clone());
                state.settle(PipelineStage::SketchReady);
                Ok(SketchReadyView { sketch, metadata })
            }
            Err(err) => Err(self.fail(StageKind::Sketch, &err)),
        }
    }

    fn begin(&self) -> Result<InFlight<'_>, ThumbnailError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ThumbnailError::PipelineBusy)?;
        Ok(InFlight { controller: self })
    }

    fn fail(&self, stage: StageKind, err: &GenerationError) -> ThumbnailError {
        let failure = StageFailure::from_generation(stage, err);
        warn!("{} failed with {}: {}", stage, failure.category, err);
        let mut state = self.lock_state();
        state.enter(PipelineStage::Failed);
        state.last_error = Some(failure.clone());
        failure.to_error()
    }

    fn emit(&self, stage: PipelineStage) {
        if let Some(event) = ProgressEvent::starting(stage) {
            info!("{}", event.label);
            // No subscribers is fine.
            let _ = self.progress.send(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::services::generation::{GenerationRequest, GenerationResponse, GenerationService};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl GenerationService for Unreachable {
        async fn generate_content(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            Err(GenerationError::Transport("connection refused".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl GenerationService for Hanging {
        async fn generate_content(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            std::future::pending().await
        }
    }

    fn image(tag: &str) -> EncodedImage {
        EncodedImage::from_bytes(tag.as_bytes(), "image/png")
    }

    fn controller(brand_assets: Vec<EncodedImage>) -> PipelineController {
        let client = GenerationClient::new(Arc::new(Unreachable), ModelConfig::default());
        PipelineController::new(client, image("face"), brand_assets)
    }

    fn request() -> StartRequest {
        StartRequest {
            content: ContentContext::Headline {
                title: "I Tried 100 Days".into(),
                subtitle: String::new(),
            },
            style: GenerationStyle::Cinematic,
            aspect_ratio: AspectRatio::Landscape,
        }
    }

    #[test]
    fn brand_assets_are_capped() {
        let c = controller(vec![image("a"), image("b"), image("c")]);
        assert_eq!(c.brand_assets(), vec![image("a"), image("b")]);
    }

    #[tokio::test]
    async fn stage_operations_are_illegal_while_idle() {
        let c = controller(vec![]);

        assert!(matches!(
            c.finalize(None, FontStyle::Impact).await,
            Err(ThumbnailError::IllegalStateTransition { .. })
        ));
        assert!(matches!(
            c.regenerate_sketch(None).await,
            Err(ThumbnailError::IllegalStateTransition { .. })
        ));
        assert!(matches!(
            c.critique().await,
            Err(ThumbnailError::IllegalStateTransition { .. })
        ));
        assert!(matches!(
            c.edit_metadata_field(MetadataEdit::AddProp { value: "x".into() }),
            Err(ThumbnailError::IllegalStateTransition { .. })
        ));

        let state = c.state();
        assert_eq!(state.stage, PipelineStage::Idle);
        assert!(state.metadata.is_none() && state.run.is_none());
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn ideation_transport_failure_is_recorded_and_resumes_idle() {
        let c = controller(vec![]);
        let err = c.start_pipeline(request()).await.unwrap_err();

        assert_eq!(err.stage(), Some(StageKind::Ideation));
        assert_eq!(c.stage(), PipelineStage::Failed);
        assert_eq!(c.state().effective_stage(), PipelineStage::Idle);
        assert!(c.last_error().is_some());
        assert!(!c.is_busy());

        // A fresh attempt is allowed from the failed state.
        assert!(c.start_pipeline(request()).await.is_err());
    }

    #[tokio::test]
    async fn progress_label_is_emitted_at_stage_start() {
        let c = controller(vec![]);
        let mut events = c.subscribe();
        let _ = c.start_pipeline(request()).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.stage, PipelineStage::Strategizing);
        assert_eq!(event.label, "Strategizing visual impact...");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_from_failed_returns_to_idle() {
        let c = controller(vec![image("logo")]);
        let _ = c.start_pipeline(request()).await;
        c.reset().unwrap();

        let state = c.state();
        assert_eq!(state.stage, PipelineStage::Idle);
        assert!(state.last_error.is_none());
        assert_eq!(state.identity, image("face"));
        assert_eq!(state.brand_assets, vec![image("logo")]);
    }

    #[tokio::test]
    async fn dropped_ideation_settles_on_failed() {
        let client = GenerationClient::new(Arc::new(Hanging), ModelConfig::default());
        let c = PipelineController::new(client, image("face"), vec![]);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            c.start_pipeline(request()),
        )
        .await;
        assert!(outcome.is_err());

        let state = c.state();
        assert_eq!(state.stage, PipelineStage::Failed);
        assert_eq!(state.effective_stage(), PipelineStage::Idle);
        assert_eq!(
            state.last_error.map(|f| f.stage),
            Some(StageKind::Ideation)
        );
        assert!(!c.is_busy());
    }
}

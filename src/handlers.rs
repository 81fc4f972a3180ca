// src/handlers.rs
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::Bytes;
use futures_util::{TryStreamExt, stream};
use log::warn;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::errors::ThumbnailError;
use crate::models::{
    AspectRatio, ColorPalette, ContentContext, EncodedImage, FontStyle, GenerationStyle,
    MetadataEdit, PipelineStage, SketchReadyView, ThumbnailMetadata,
};
use crate::pipeline::{MAX_BRAND_ASSETS, PipelineController, StartRequest};
use crate::services::image_encoder::MAX_UPLOAD_BYTES;
use crate::services::{GenerationClient, ImageEncoder};
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub client: GenerationClient,
    pub encoder: Arc<ImageEncoder>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/sessions", web::post().to(create_session))
            .route("/sessions/{session_id}", web::get().to(get_session))
            .route("/sessions/{session_id}", web::delete().to(delete_session))
            .route("/sessions/{session_id}/start", web::post().to(start_pipeline))
            .route("/sessions/{session_id}/sketch", web::post().to(regenerate_sketch))
            .route("/sessions/{session_id}/metadata", web::patch().to(edit_metadata))
            .route("/sessions/{session_id}/finalize", web::post().to(finalize))
            .route("/sessions/{session_id}/critique", web::post().to(critique))
            .route("/sessions/{session_id}/reset", web::post().to(reset))
            .route(
                "/sessions/{session_id}/images/{kind}",
                web::get().to(get_image),
            )
            .route(
                "/sessions/{session_id}/events",
                web::get().to(progress_events),
            )
            .route("/palettes", web::get().to(list_palettes)),
    )
    .route("/health", web::get().to(health_check));
}

/// Multipart upload: one `identity` image and up to two `brand` images.
pub async fn create_session(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut identity = None;
    let mut brand_assets = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let name = field
            .content_disposition()
            .get_name()
            .unwrap_or_default()
            .to_string();

        let content_type = field.content_type().map(|ct| ct.essence_str().to_string());

        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            image_data.extend_from_slice(&chunk);
            if image_data.len() > MAX_UPLOAD_BYTES {
                return Err(ThumbnailError::Encoding(format!(
                    "Upload '{}' exceeds {} bytes",
                    name, MAX_UPLOAD_BYTES
                ))
                .into());
            }
        }

        match name.as_str() {
            "identity" => {
                identity = Some(
                    data.encoder
                        .encode_bytes(&image_data, content_type.as_deref())?,
                );
            }
            "brand" if brand_assets.len() < MAX_BRAND_ASSETS => {
                brand_assets.push(
                    data.encoder
                        .encode_bytes(&image_data, content_type.as_deref())?,
                );
            }
            "brand" => warn!("Ignoring brand asset beyond the limit of {}", MAX_BRAND_ASSETS),
            other => warn!("Ignoring unexpected upload field '{}'", other),
        }
    }

    let identity = identity
        .ok_or_else(|| ThumbnailError::Validation("An identity image is required".to_string()))?;
    let brand_asset_count = brand_assets.len();

    let controller = PipelineController::new(data.client.clone(), identity, brand_assets);
    let session_id = data.sessions.insert(controller).await;

    Ok(HttpResponse::Created().json(json!({
        "session_id": session_id,
        "brand_assets": brand_asset_count
    })))
}

pub async fn get_session(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(controller.snapshot()))
}

pub async fn delete_session(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();
    if !data.sessions.remove(&session_id).await {
        return Err(ThumbnailError::NotFound(format!("Session {}", session_id)).into());
    }
    Ok(HttpResponse::NoContent().finish())
}

/// Runs a transition on its own task. A client disconnect drops the handler
/// future but not the generation call, whose result is still applied.
async fn detached<T, F>(transition: F) -> Result<T, Error>
where
    T: 'static,
    F: std::future::Future<Output = Result<T, ThumbnailError>> + 'static,
{
    actix_web::rt::spawn(transition)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .map_err(Error::from)
}

#[derive(Debug, Deserialize)]
pub struct StartPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub article: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

pub async fn start_pipeline(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<StartPayload>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let body = body.into_inner();

    let request = StartRequest {
        content: ContentContext::from_inputs(&body.title, &body.subtitle, &body.article)?,
        style: body
            .style
            .as_deref()
            .map(GenerationStyle::from_label)
            .unwrap_or_default(),
        aspect_ratio: body.aspect_ratio,
    };

    let view = detached(async move { controller.start_pipeline(request).await }).await?;
    Ok(HttpResponse::Ok().json(sketch_ready_json(&view)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RegeneratePayload {
    #[serde(default)]
    pub metadata: Option<ThumbnailMetadata>,
}

pub async fn regenerate_sketch(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: Option<web::Json<RegeneratePayload>>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let edited = body.and_then(|b| b.into_inner().metadata);

    let view = detached(async move { controller.regenerate_sketch(edited).await }).await?;
    Ok(HttpResponse::Ok().json(sketch_ready_json(&view)))
}

pub async fn edit_metadata(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<MetadataEdit>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let metadata = controller.edit_metadata_field(body.into_inner())?;
    Ok(HttpResponse::Ok().json(json!({ "metadata": metadata })))
}

#[derive(Debug, Default, Deserialize)]
pub struct FinalizePayload {
    #[serde(default)]
    pub palette: Option<ColorPalette>,
    #[serde(default)]
    pub font: FontStyle,
}

pub async fn finalize(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: Option<web::Json<FinalizePayload>>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let body = body.map(|b| b.into_inner()).unwrap_or_default();

    let image =
        detached(async move { controller.finalize(body.palette, body.font).await }).await?;
    Ok(HttpResponse::Ok().json(final_json(&image)))
}

pub async fn critique(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let image = detached(async move { controller.critique().await }).await?;
    Ok(HttpResponse::Ok().json(final_json(&image)))
}

pub async fn reset(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    controller.reset()?;
    Ok(HttpResponse::Ok().json(controller.snapshot()))
}

pub async fn get_image(
    path: web::Path<(Uuid, String)>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (session_id, kind) = path.into_inner();
    let controller = data.sessions.get(&session_id).await?;

    let image = match kind.as_str() {
        "sketch" => controller.sketch(),
        "final" => controller.final_image(),
        "identity" => Some(controller.identity_image()),
        other => {
            return Err(ThumbnailError::NotFound(format!("Image kind '{}'", other)).into());
        }
    }
    .ok_or_else(|| ThumbnailError::NotFound(format!("No {} image yet", kind)))?;

    let bytes: Bytes = image.decode()?;
    Ok(HttpResponse::Ok()
        .content_type(image.media_type)
        .body(bytes))
}

/// Server-sent events carrying one progress label per stage start.
pub async fn progress_events(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let controller = data.sessions.get(&path.into_inner()).await?;
    let receiver = controller.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    let frame = Bytes::from(format!("data: {}\n\n", payload));
                    return Some((Ok::<_, Infallible>(frame), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events))
}

pub async fn list_palettes() -> HttpResponse {
    HttpResponse::Ok().json(ColorPalette::presets())
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "thumbnail-forge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn sketch_ready_json(view: &SketchReadyView) -> Value {
    json!({
        "stage": PipelineStage::SketchReady,
        "metadata": view.metadata,
        "sketch_url": view.sketch.to_data_url()
    })
}

fn final_json(image: &EncodedImage) -> Value {
    json!({
        "stage": PipelineStage::Finalized,
        "image_url": image.to_data_url()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::errors::GenerationError;
    use crate::services::generation::{GenerationRequest, GenerationResponse, GenerationService};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<GenerationResponse>>);

    #[async_trait]
    impl GenerationService for Scripted {
        async fn generate_content(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| GenerationError::Transport("script exhausted".into()))
        }
    }

    fn scripted(responses: Vec<Value>) -> GenerationClient {
        let responses = responses
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        GenerationClient::new(Arc::new(Scripted(Mutex::new(responses))), ModelConfig::default())
    }

    fn app_state(client: GenerationClient) -> AppState {
        AppState {
            sessions: Arc::new(SessionStore::new(3600)),
            client,
            encoder: Arc::new(ImageEncoder::new(2048)),
        }
    }

    fn strategy() -> Value {
        let metadata = json!({
            "visual_hooks": ["lava", "drone", "countdown"],
            "visual_description": "wide-eyed",
            "clickbait_text": "TOO HOT",
            "props": ["thermometer"],
            "background_context": "volcano rim"
        });
        json!({ "candidates": [{ "finishReason": "STOP", "content": { "parts": [{ "text": metadata.to_string() }] } }] })
    }

    fn image_reply(data: &str) -> Value {
        json!({ "candidates": [{ "finishReason": "STOP", "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": data } }] } }] })
    }

    fn png_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, bytes) in fields {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}.png\"\r\nContent-Type: image/png\r\n\r\n",
                    name, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    #[actix_web::test]
    async fn health_reports_service_name() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state(scripted(vec![]))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "thumbnail-forge");
    }

    #[actix_web::test]
    async fn upload_start_and_fetch_sketch() {
        let state = app_state(scripted(vec![strategy(), image_reply("c2tldGNo")]));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let png = png_bytes();
        let boundary = "XBOUNDARYX";
        let req = test::TestRequest::post()
            .uri("/api/v1/sessions")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(multipart_body(
                boundary,
                &[("identity", &png), ("brand", &png), ("brand", &png), ("brand", &png)],
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["brand_assets"], 2);
        let session_id = created["session_id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/sessions/{}/start", session_id))
            .set_json(json!({ "title": "Volcano Camping", "style": "Cinematic", "aspect_ratio": "1:1" }))
            .to_request();
        let started: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(started["stage"], "sketch_ready");
        assert_eq!(started["metadata"]["clickbait_text"], "TOO HOT");
        assert_eq!(started["sketch_url"], "data:image/png;base64,c2tldGNo");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/sessions/{}/images/sketch", session_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = test::read_body(resp).await;
        assert_eq!(bytes.as_ref(), b"sketch");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/sessions/{}/images/final", session_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn upload_without_identity_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state(scripted(vec![]))))
                .configure(configure),
        )
        .await;

        let png = png_bytes();
        let req = test::TestRequest::post()
            .uri("/api/v1/sessions")
            .insert_header(("content-type", "multipart/form-data; boundary=B"))
            .set_payload(multipart_body("B", &[("brand", &png)]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn finalize_while_idle_is_a_conflict_without_internals() {
        let state = app_state(scripted(vec![]));
        let identity = EncodedImage::from_bytes(&png_bytes(), "image/png");
        let session_id = state
            .sessions
            .insert(PipelineController::new(state.client.clone(), identity, vec![]))
            .await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/sessions/{}/finalize", session_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert!(!body["message"].as_str().unwrap().contains("idle"));
    }

    #[actix_web::test]
    async fn deleted_session_is_gone() {
        let state = app_state(scripted(vec![]));
        let identity = EncodedImage::from_bytes(&png_bytes(), "image/png");
        let session_id = state
            .sessions
            .insert(PipelineController::new(state.client.clone(), identity, vec![]))
            .await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let uri = format!("/api/v1/sessions/{}", session_id);
        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(&app, test::TestRequest::delete().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn unknown_session_is_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state(scripted(vec![]))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/sessions/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn palettes_are_listed() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state(scripted(vec![]))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/palettes").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 6);
    }
}

// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use log::info;
use std::sync::Arc;
use std::time::Duration;

use thumbnail_forge::config::AppConfig;
use thumbnail_forge::handlers::{self, AppState};
use thumbnail_forge::services::{GeminiService, GenerationClient, ImageEncoder};
use thumbnail_forge::sessions::SessionStore;

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting thumbnail-forge service...");

    let config = AppConfig::from_env()?;
    info!(
        "Using strategy model {} and image model {}",
        config.models.strategy_model, config.models.image_model
    );

    // Initialize services
    let gemini = Arc::new(GeminiService::new(config.api_key.clone(), config.api_base.clone()));
    let client = GenerationClient::new(gemini, config.models.clone());
    let sessions = Arc::new(SessionStore::new(config.session_ttl_secs));

    let app_state = AppState {
        sessions: sessions.clone(),
        client,
        encoder: Arc::new(ImageEncoder::new(config.max_upload_dimension)),
    };

    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            sessions.purge_expired().await;
        }
    });

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}

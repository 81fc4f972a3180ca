// src/sessions.rs
use chrono::{DateTime, Duration, Utc};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::ThumbnailError;
use crate::pipeline::PipelineController;

struct SessionEntry {
    controller: Arc<PipelineController>,
    last_seen: DateTime<Utc>,
}

/// In-memory pipeline instances keyed by session id. Nothing is persisted;
/// idle sessions are dropped after the configured lifetime.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub async fn insert(&self, controller: PipelineController) -> Uuid {
        self.purge_expired().await;

        let id = Uuid::new_v4();
        let now = Utc::now();
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                controller: Arc::new(controller),
                last_seen: now,
            },
        );
        info!("Created session {}", id);
        id
    }

    pub async fn get(&self, id: &Uuid) -> Result<Arc<PipelineController>, ThumbnailError> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        let expired = match sessions.get(id) {
            Some(entry) => now - entry.last_seen > self.ttl,
            None => return Err(ThumbnailError::NotFound(format!("Session {}", id))),
        };
        if expired {
            sessions.remove(id);
            info!("Session {} expired", id);
            return Err(ThumbnailError::NotFound(format!("Session {}", id)));
        }

        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ThumbnailError::NotFound(format!("Session {}", id)))?;
        entry.last_seen = now;
        Ok(entry.controller.clone())
    }

    /// A transition still running keeps its controller alive until it
    /// resolves.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!("Removed session {}", id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle past the lifetime. Busy pipelines are kept.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now - entry.last_seen <= self.ttl || entry.controller.is_busy());
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Purged {} expired session(s)", purged);
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::errors::GenerationError;
    use crate::models::EncodedImage;
    use crate::services::generation::{
        GenerationClient, GenerationRequest, GenerationResponse, GenerationService,
    };
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl GenerationService for Silent {
        async fn generate_content(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            Ok(GenerationResponse::default())
        }
    }

    fn controller() -> PipelineController {
        let client = GenerationClient::new(Arc::new(Silent), ModelConfig::default());
        PipelineController::new(client, EncodedImage::from_bytes(b"face", "image/png"), vec![])
    }

    #[tokio::test]
    async fn sessions_are_retrievable_until_removed() {
        let store = SessionStore::new(60);
        let id = store.insert(controller()).await;

        assert!(store.get(&id).await.is_ok());
        assert_eq!(store.len().await, 1);

        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
        assert!(matches!(store.get(&id).await, Err(ThumbnailError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = SessionStore::new(60);
        assert!(matches!(
            store.get(&Uuid::new_v4()).await,
            Err(ThumbnailError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(-1);
        let id = store.insert(controller()).await;

        assert!(matches!(store.get(&id).await, Err(ThumbnailError::NotFound(_))));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn purge_drops_expired_sessions() {
        let store = SessionStore::new(-1);
        store.insert(controller()).await;
        // Inserting purges first, so only the newest session is left.
        store.insert(controller()).await;
        assert_eq!(store.len().await, 1);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 0);
    }
}

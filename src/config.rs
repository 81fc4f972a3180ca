// src/config.rs
use std::collections::HashMap;

use crate::errors::ThumbnailError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model identifiers used by the two kinds of calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub strategy_model: String,
    pub image_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            strategy_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base: String,
    pub models: ModelConfig,
    pub bind_addr: String,
    pub session_ttl_secs: i64,
    pub max_upload_dimension: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ThumbnailError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(values: &HashMap<&str, &str>) -> Result<Self, ThumbnailError> {
        Self::from_lookup(|key| values.get(key).map(|v| v.to_string()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ThumbnailError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ThumbnailError::Config("GEMINI_API_KEY must be set".to_string()))?;

        let defaults = ModelConfig::default();
        let models = ModelConfig {
            strategy_model: lookup("THUMBNAIL_STRATEGY_MODEL").unwrap_or(defaults.strategy_model),
            image_model: lookup("THUMBNAIL_IMAGE_MODEL").unwrap_or(defaults.image_model),
        };

        Ok(Self {
            api_key,
            api_base: lookup("GEMINI_API_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            models,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            session_ttl_secs: parse_number(&lookup, "SESSION_TTL_SECS", 86400)?,
            max_upload_dimension: parse_number(&lookup, "MAX_UPLOAD_DIMENSION", 2048)?,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ThumbnailError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ThumbnailError::Config(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = AppConfig::from_map(&HashMap::from([("GEMINI_API_KEY", "secret")])).unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.models, ModelConfig::default());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.session_ttl_secs, 86400);
        assert_eq!(config.max_upload_dimension, 2048);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = AppConfig::from_map(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ThumbnailError::Config(_)));
    }

    #[test]
    fn overrides_are_read_and_validated() {
        let config = AppConfig::from_map(&HashMap::from([
            ("GEMINI_API_KEY", "secret"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
            ("THUMBNAIL_IMAGE_MODEL", "image-model-x"),
            ("MAX_UPLOAD_DIMENSION", "1024"),
        ]))
        .unwrap();
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        assert_eq!(config.models.image_model, "image-model-x");
        assert_eq!(config.max_upload_dimension, 1024);

        let err = AppConfig::from_map(&HashMap::from([
            ("GEMINI_API_KEY", "secret"),
            ("SESSION_TTL_SECS", "a day"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ThumbnailError::Config(_)));
    }
}

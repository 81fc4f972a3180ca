// src/services/image_encoder.rs
use crate::errors::ThumbnailError;
use crate::models::{ACCEPTED_MEDIA_TYPES, EncodedImage};
use image::{DynamicImage, GenericImageView, ImageFormat as ImgFormat};
use log::{debug, info};
use std::path::Path;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Turns uploaded files into [`EncodedImage`] payloads.
pub struct ImageEncoder {
    max_dimension: u32,
}

impl ImageEncoder {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    pub async fn encode_file(&self, path: impl AsRef<Path>) -> Result<EncodedImage, ThumbnailError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            ThumbnailError::Encoding(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.encode_bytes(&data, None)
    }

    /// `declared_type` is what the uploader claimed; the sniffed format wins,
    /// but a declared type outside the accepted set is rejected up front.
    pub fn encode_bytes(
        &self,
        data: &[u8],
        declared_type: Option<&str>,
    ) -> Result<EncodedImage, ThumbnailError> {
        if let Some(declared) = declared_type {
            if !ACCEPTED_MEDIA_TYPES.contains(&declared) {
                return Err(ThumbnailError::Encoding(format!(
                    "Unsupported media type: {}",
                    declared
                )));
            }
        }

        if data.len() > MAX_UPLOAD_BYTES {
            return Err(ThumbnailError::Encoding(format!(
                "Image is {} bytes, limit is {}",
                data.len(),
                MAX_UPLOAD_BYTES
            )));
        }

        let media_type = sniff_media_type(data)?;
        let img = self.validate_image(data)?;
        let (width, height) = img.dimensions();
        debug!("Encoding {} image {}x{}", media_type, width, height);

        match self.resize_if_needed(&img)? {
            Some(resized) => Ok(EncodedImage::from_bytes(&resized, "image/png")),
            None => Ok(EncodedImage::from_bytes(data, media_type)),
        }
    }

    /// Decodes the upload; the decoded image is reused for resizing.
    pub fn validate_image(&self, data: &[u8]) -> Result<DynamicImage, ThumbnailError> {
        let img = image::load_from_memory(data)
            .map_err(|e| ThumbnailError::Encoding(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ThumbnailError::Encoding("Image has no pixels".to_string()));
        }

        Ok(img)
    }

    /// Downscales to fit `max_dimension`, re-encoding as PNG. Returns `None`
    /// when the image already fits.
    pub fn resize_if_needed(&self, img: &DynamicImage) -> Result<Option<Vec<u8>>, ThumbnailError> {
        let (width, height) = img.dimensions();

        if width <= self.max_dimension && height <= self.max_dimension {
            return Ok(None);
        }

        let ratio = (self.max_dimension as f32 / width.max(height) as f32).min(1.0);
        let new_width = ((width as f32 * ratio) as u32).max(1);
        let new_height = ((height as f32 * ratio) as u32).max(1);
        info!(
            "Downscaling upload from {}x{} to {}x{}",
            width, height, new_width, new_height
        );

        let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

        let mut output = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| {
                ThumbnailError::Encoding(format!("Failed to encode resized image: {}", e))
            })?;

        Ok(Some(output))
    }
}

fn sniff_media_type(data: &[u8]) -> Result<&'static str, ThumbnailError> {
    let format = image::guess_format(data)
        .map_err(|e| ThumbnailError::Encoding(format!("Unrecognized image data: {}", e)))?;
    match format {
        ImgFormat::Png => Ok("image/png"),
        ImgFormat::Jpeg => Ok("image/jpeg"),
        ImgFormat::WebP => Ok("image/webp"),
        other => Err(ThumbnailError::Encoding(format!(
            "Unsupported image format: {:?}",
            other
        ))),
    }
}

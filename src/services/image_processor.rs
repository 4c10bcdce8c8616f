// src/services/image_processor.rs
use crate::errors::FacemapError;
use crate::models::{CapturedImage, Provenance};
use crate::services::camera_service::RgbFrame;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

const MAX_DIMENSION: u32 = 4096;
const TARGET_MAX_EDGE: u32 = 2048;
const JPEG_QUALITY: u8 = 90;

/// Normalizes both capture sources into the single in-memory JPEG
/// representation the analysis call expects.
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Decode an uploaded file, enforce size limits, and re-encode as JPEG.
    pub fn capture_from_file(&self, data: &[u8]) -> Result<CapturedImage, FacemapError> {
        let img = image::load_from_memory(data)
            .map_err(|e| FacemapError::InvalidImage(format!("undecodable image: {e}")))?;

        let (width, height) = img.dimensions();
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(FacemapError::InvalidImage(format!(
                "image dimensions exceed {MAX_DIMENSION}x{MAX_DIMENSION}"
            )));
        }

        let img = if width.max(height) > TARGET_MAX_EDGE {
            img.resize(
                TARGET_MAX_EDGE,
                TARGET_MAX_EDGE,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };

        let jpeg = encode_jpeg(&img)?;
        Ok(CapturedImage::new(jpeg, Provenance::Uploaded))
    }

    /// Encode a camera frame, mirrored horizontally so the stored capture
    /// matches the user-facing (front camera) preview.
    pub fn capture_from_frame(&self, frame: RgbFrame) -> Result<CapturedImage, FacemapError> {
        let buf = image::RgbImage::from_raw(frame.width, frame.height, frame.data).ok_or_else(
            || FacemapError::InvalidImage("frame buffer does not match its dimensions".to_string()),
        )?;

        let mirrored = image::imageops::flip_horizontal(&buf);
        let jpeg = encode_jpeg(&DynamicImage::ImageRgb8(mirrored))?;
        Ok(CapturedImage::new(jpeg, Provenance::Captured))
    }
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, FacemapError> {
    // JPEG has no alpha channel; flatten whatever the decoder produced.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut output = Vec::new();
    rgb.write_to(
        &mut std::io::Cursor::new(&mut output),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )
    .map_err(|e| FacemapError::InvalidImage(format!("jpeg encode failed: {e}")))?;
    Ok(output)
}

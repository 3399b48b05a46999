//! Core types flowing between pipeline stages

use crate::error::{BgRemovalError, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Decoded in-memory image: RGBA, 4 bytes per pixel, row-major, top-to-bottom
///
/// A handle is owned by exactly one stage at a time; stages consume handles
/// by value and hand a new one to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHandle {
    image: RgbaImage,
}

impl ImageHandle {
    /// Wrap an already decoded RGBA buffer
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Build a handle from raw RGBA bytes
    ///
    /// # Errors
    /// - Buffer length does not equal `width * height * 4`
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(BgRemovalError::internal(format!(
                "RGBA buffer has {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        RgbaImage::from_raw(width, height, pixels)
            .map(Self::new)
            .ok_or_else(|| BgRemovalError::internal("Failed to wrap RGBA buffer"))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Number of pixels (not bytes)
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Raw RGBA bytes
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    #[must_use]
    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_rgba_image(self) -> RgbaImage {
        self.image
    }
}

/// Per-pixel background confidence for the normalized image
///
/// Higher scores mean "more background". Scores are stored as produced by
/// the model and clamped only when they are turned into alpha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl SegmentationMask {
    /// Create a mask, checking that the score count matches the dimensions
    ///
    /// # Errors
    /// - `scores.len() != width * height`
    pub fn new(width: u32, height: u32, scores: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if scores.len() != expected {
            return Err(BgRemovalError::inference(format!(
                "Mask has {} scores, expected {} for {}x{}",
                scores.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            scores,
        })
    }

    /// Mask with every score set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            scores: vec![value; width as usize * height as usize],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }
}

/// RGBA image whose alpha channel was derived from a segmentation mask
///
/// Editors may rewrite pixels and alpha, but the dimensions never change.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    image: RgbaImage,
}

impl ProcessedImage {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_rgba_image(self) -> RgbaImage {
        self.image
    }

    /// Alpha value of the pixel at `(x, y)`, if in bounds
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        self.image.get_pixel_checked(x, y).map(|p| p[3])
    }
}

/// Output format for final artifacts
///
/// Only lossless, alpha-preserving formats are allowed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
}

impl OutputFormat {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
        }
    }
}

/// Encoded final artifact (the "blob")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encoded image handed to the segmentation model
///
/// This is a lossy re-encode of the normalized buffer and must never be
/// used as a final artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl TransportImage {
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Timing breakdown of one processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub normalize_ms: u64,
    pub segmentation_ms: u64,
    pub composite_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Total: {}ms | Normalize: {}ms | Segmentation: {}ms | Composite: {}ms | Encode: {}ms",
            self.total_ms, self.normalize_ms, self.segmentation_ms, self.composite_ms, self.encode_ms
        )
    }
}

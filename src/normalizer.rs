//! Aspect-preserving downscale that bounds inference cost

use crate::types::ImageHandle;
use image::imageops::{self, FilterType};

/// Result of normalizing an image
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Buffer handed to inference (and, later, to the compositor)
    pub buffer: ImageHandle,
    /// Whether a resampling pass was applied
    pub was_resized: bool,
}

/// Downscales images so neither side exceeds `max_dimension`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    max_dimension: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_DIMENSION)
    }
}

impl Normalizer {
    /// # Panics
    /// - `max_dimension` is zero
    #[must_use]
    pub fn new(max_dimension: u32) -> Self {
        assert!(max_dimension > 0, "max_dimension must be at least 1");
        Self { max_dimension }
    }

    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Fit `img` inside the bound, never upscaling
    ///
    /// Images already within the bound pass through untouched. Otherwise a
    /// single bilinear (`Triangle`) pass scales the larger side to exactly
    /// `max_dimension`.
    ///
    /// # Panics
    /// - `img` has a zero dimension (the loader never produces one)
    #[must_use]
    pub fn normalize(&self, img: ImageHandle) -> Normalized {
        let (width, height) = img.dimensions();
        assert!(
            width > 0 && height > 0,
            "cannot normalize a {}x{} image",
            width,
            height
        );

        let (target_width, target_height) = target_dimensions(width, height, self.max_dimension);
        if (target_width, target_height) == (width, height) {
            return Normalized {
                buffer: img,
                was_resized: false,
            };
        }

        let resized = imageops::resize(
            img.as_rgba_image(),
            target_width,
            target_height,
            FilterType::Triangle,
        );
        log::debug!(
            "Normalized {}x{} -> {}x{}",
            width,
            height,
            target_width,
            target_height
        );

        Normalized {
            buffer: ImageHandle::new(resized),
            was_resized: true,
        }
    }
}

/// Output dimensions for fitting `width x height` within `max_dimension`
///
/// The larger side becomes `max_dimension`; the other is
/// `round(other * max_dimension / larger)`, never below 1. Equal sides scale
/// like a portrait image.
#[must_use]
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    if width > height {
        (max_dimension, scale_side(height, max_dimension, width))
    } else {
        (scale_side(width, max_dimension, height), max_dimension)
    }
}

/// `round(side * numerator / denominator)` in integer arithmetic, at least 1
fn scale_side(side: u32, numerator: u32, denominator: u32) -> u32 {
    let side = u64::from(side);
    let numerator = u64::from(numerator);
    let denominator = u64::from(denominator);
    let scaled = (2 * side * numerator + denominator) / (2 * denominator);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

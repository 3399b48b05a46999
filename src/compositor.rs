//! Mask-to-alpha compositing

use crate::error::{BgRemovalError, Result};
use crate::types::{ImageHandle, ProcessedImage, SegmentationMask};

/// Writes a segmentation mask into the alpha channel of a buffer
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphaCompositor;

impl AlphaCompositor {
    /// Replace the alpha channel of `buffer` with `round((1 - clamp(m)) * 255)`
    ///
    /// RGB channels are copied unchanged. Both inputs are consumed: the mask
    /// is discarded after this call and the buffer becomes the processed
    /// image.
    ///
    /// # Errors
    /// - Mask dimensions differ from the buffer (`Inference`)
    pub fn composite(buffer: ImageHandle, mask: SegmentationMask) -> Result<ProcessedImage> {
        if buffer.dimensions() != (mask.width(), mask.height())
            || buffer.pixel_count() != mask.len()
        {
            return Err(BgRemovalError::inference(format!(
                "Mask is {}x{} ({} scores) but image is {}x{} ({} pixels)",
                mask.width(),
                mask.height(),
                mask.len(),
                buffer.width(),
                buffer.height(),
                buffer.pixel_count()
            )));
        }

        let mut image = buffer.into_rgba_image();
        for (pixel, &score) in image.pixels_mut().zip(mask.scores()) {
            pixel[3] = Self::alpha_for(score);
        }

        Ok(ProcessedImage::new(image))
    }

    /// Alpha for a single background score
    ///
    /// Scores are clamped to `[0, 1]` first; NaN counts as background.
    #[must_use]
    pub fn alpha_for(score: f32) -> u8 {
        let score = if score.is_nan() {
            1.0
        } else {
            score.clamp(0.0, 1.0)
        };
        ((1.0 - score) * 255.0).round() as u8
    }
}

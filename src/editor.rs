//! Editing collaborator contract
//!
//! Editors receive the current processed image and return a replacement of
//! the same size. The pipeline treats them as opaque transforms.

use crate::error::{BgRemovalError, Result};
use crate::types::ProcessedImage;
use image::{Rgba, RgbaImage};

/// `ProcessedImage -> ProcessedImage` transform
pub trait ImageEditor: Send + Sync {
    /// Produce the edited image
    ///
    /// # Errors
    /// Implementation specific; surfaced to the user as a failed edit.
    fn edit(&self, image: &ProcessedImage) -> Result<ProcessedImage>;

    fn name(&self) -> &str {
        "editor"
    }
}

/// Replace the transparent background with an opaque colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolidBackground {
    pub color: [u8; 3],
}

impl SolidBackground {
    #[must_use]
    pub fn new(color: [u8; 3]) -> Self {
        Self { color }
    }

    /// Parse `#rrggbb` or `rrggbb`
    ///
    /// # Errors
    /// - Not six hex digits (`InvalidConfig`)
    pub fn parse_hex(value: &str) -> Result<Self> {
        let hex = value.trim().trim_start_matches('#');
        let invalid = || {
            BgRemovalError::config_value_error(
                "background color",
                value,
                "#rrggbb",
                Some("#ffffff"),
            )
        };
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(invalid)
        };
        Ok(Self::new([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }
}

impl ImageEditor for SolidBackground {
    fn edit(&self, image: &ProcessedImage) -> Result<ProcessedImage> {
        let source = image.as_rgba_image();
        let [back_r, back_g, back_b] = self.color.map(u32::from);

        let composited = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
            let Rgba([r, g, b, a]) = *source.get_pixel(x, y);
            let alpha = u32::from(a);
            let blend = |front: u8, back: u32| {
                ((u32::from(front) * alpha + back * (255 - alpha) + 127) / 255) as u8
            };
            Rgba([blend(r, back_r), blend(g, back_g), blend(b, back_b), 255])
        });

        Ok(ProcessedImage::new(composited))
    }

    fn name(&self) -> &str {
        "solid-background"
    }
}

//! Output encoding
//!
//! Final artifacts are always lossless with alpha. The lossy JPEG path exists
//! only for the transport image handed to the segmentation model.

use crate::error::{BgRemovalError, Result};
use crate::types::{EncodedImage, ImageHandle, OutputFormat, ProcessedImage, TransportImage};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

/// Serializes processed images
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputEncoder;

impl OutputEncoder {
    /// Encode a processed image as a final artifact
    ///
    /// # Errors
    /// - Zero dimensions or an encoder failure (`Encode`)
    pub async fn encode(image: &ProcessedImage, format: OutputFormat) -> Result<EncodedImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgRemovalError::encode(format!(
                "Cannot encode a {}x{} image",
                width, height
            )));
        }

        let bytes = match format {
            OutputFormat::Png => encode_png(image.as_rgba_image().as_raw(), width, height)?,
        };

        log::debug!(
            "Encoded {}x{} image as {} ({} bytes)",
            width,
            height,
            format.mime_type(),
            bytes.len()
        );

        Ok(EncodedImage {
            bytes,
            format,
            width,
            height,
        })
    }

    /// Lossy JPEG re-encode of a normalized buffer for the model
    ///
    /// Alpha is dropped. `quality` is clamped to 1-100.
    ///
    /// # Errors
    /// - Zero dimensions or an encoder failure (`Encode`)
    pub fn encode_transport(buffer: &ImageHandle, quality: u8) -> Result<TransportImage> {
        let (width, height) = buffer.dimensions();
        if width == 0 || height == 0 {
            return Err(BgRemovalError::encode(format!(
                "Cannot encode a {}x{} transport image",
                width, height
            )));
        }

        let rgb = DynamicImage::ImageRgba8(buffer.as_rgba_image().clone()).to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| BgRemovalError::encode(format!("JPEG transport encode failed: {}", e)))?;

        Ok(TransportImage {
            bytes,
            mime_type: "image/jpeg",
            width,
            height,
        })
    }
}

fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| BgRemovalError::encode(format!("PNG encode failed: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> RgbaImage {
        let mut image = RgbaImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8, y as u8, 90, ((x * 7 + y * 3) % 256) as u8]);
        }
        image
    }

    #[tokio::test]
    async fn test_png_preserves_alpha_losslessly() {
        let source = gradient(31, 17);
        let processed = ProcessedImage::new(source.clone());
        let encoded = OutputEncoder::encode(&processed, OutputFormat::Png).await.unwrap();

        assert_eq!(encoded.mime_type(), "image/png");
        assert_eq!((encoded.width, encoded.height), (31, 17));

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(decoded, source);
    }

    #[tokio::test]
    async fn test_zero_dimensions_fail_with_encode_error() {
        let processed = ProcessedImage::new(RgbaImage::new(0, 5));
        let err = OutputEncoder::encode(&processed, OutputFormat::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Encode(_)));
    }

    #[test]
    fn test_transport_is_jpeg_with_same_dimensions() {
        let buffer = ImageHandle::new(gradient(40, 30));
        let transport = OutputEncoder::encode_transport(&buffer, 80).unwrap();

        assert_eq!(transport.mime_type, "image/jpeg");
        assert_eq!((transport.width, transport.height), (40, 30));
        assert_eq!(
            image::guess_format(&transport.bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&transport.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_transport_quality_is_clamped() {
        let buffer = ImageHandle::new(gradient(8, 8));
        assert!(OutputEncoder::encode_transport(&buffer, 0).is_ok());
        assert!(OutputEncoder::encode_transport(&buffer, 255).is_ok());
    }
}

//! Tensor conversion shared by the inference backends
//!
//! Models take a square NCHW tensor. The transport image is letterboxed onto
//! a white canvas of the model's input size, and the model's output plane is
//! sampled back through the same transform to one score per transport pixel.

use crate::error::{BgRemovalError, Result};
use crate::models::PreprocessingConfig;
use crate::segmentation::ModelOutput;
use crate::types::TransportImage;
use image::{imageops, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

const PADDING: Rgb<u8> = Rgb([255, 255, 255]);

/// Placement of the resized image inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub target_size: u32,
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    /// Fit `width x height` into a `target_size` square, centered
    #[must_use]
    pub fn fit(width: u32, height: u32, target_size: u32) -> Self {
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            target_size,
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        }
    }

    /// Canvas coordinate for a source pixel
    fn canvas_coordinate(&self, x: u32, y: u32) -> (usize, usize) {
        let cx = ((x as f32 * self.scale).round() as u32).min(self.scaled_width - 1) + self.offset_x;
        let cy = ((y as f32 * self.scale).round() as u32).min(self.scaled_height - 1) + self.offset_y;
        (cx as usize, cy as usize)
    }
}

/// Decode a transport image and build the normalized model input
///
/// # Errors
/// - Transport bytes do not decode (`Inference`)
/// - Non-square or zero model input size (`Inference`)
pub fn transport_to_tensor(
    transport: &TransportImage,
    preprocessing: &PreprocessingConfig,
) -> Result<(Array4<f32>, Letterbox)> {
    let [target_height, target_width] = preprocessing.target_size;
    if target_height != target_width || target_width == 0 {
        return Err(BgRemovalError::inference(format!(
            "Unsupported model input size {}x{}",
            target_width, target_height
        )));
    }

    let decoded = image::load_from_memory(&transport.bytes)
        .map_err(|e| BgRemovalError::inference(format!("Failed to decode transport image: {}", e)))?
        .to_rgb8();

    let letterbox = Letterbox::fit(decoded.width(), decoded.height(), target_width);
    let canvas = letterbox_canvas(&decoded, &letterbox);
    Ok((canvas_to_tensor(&canvas, preprocessing), letterbox))
}

fn letterbox_canvas(image: &RgbImage, letterbox: &Letterbox) -> RgbImage {
    let resized = imageops::resize(
        image,
        letterbox.scaled_width,
        letterbox.scaled_height,
        imageops::FilterType::Triangle,
    );
    let mut canvas = ImageBuffer::from_pixel(letterbox.target_size, letterbox.target_size, PADDING);
    imageops::replace(
        &mut canvas,
        &resized,
        i64::from(letterbox.offset_x),
        i64::from(letterbox.offset_y),
    );
    canvas
}

fn canvas_to_tensor(canvas: &RgbImage, preprocessing: &PreprocessingConfig) -> Array4<f32> {
    let size = canvas.width() as usize;
    let mean = preprocessing.normalization_mean;
    let std = preprocessing.normalization_std;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in canvas.enumerate_pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            let normalized = (f32::from(*value) / 255.0 - mean[channel]) / std[channel];
            if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                *slot = normalized;
            }
        }
    }

    tensor
}

/// Sample the first output plane back onto the `width x height` transport grid
///
/// Scores are clamped to `[0, 1]`.
///
/// # Errors
/// - Output is not `[1, C, H, W]` or does not match the letterbox (`Inference`)
pub fn tensor_to_output(
    tensor: &Array4<f32>,
    letterbox: &Letterbox,
    width: u32,
    height: u32,
) -> Result<ModelOutput> {
    let (batch, channels, mask_height, mask_width) = tensor.dim();
    if batch != 1 || channels == 0 {
        return Err(BgRemovalError::inference(format!(
            "Unexpected output tensor shape {:?}",
            tensor.shape()
        )));
    }
    let target = letterbox.target_size as usize;
    if mask_height != target || mask_width != target {
        return Err(BgRemovalError::inference(format!(
            "Output plane {}x{} does not match model input {}x{}",
            mask_width, mask_height, target, target
        )));
    }

    let mut mask = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = letterbox.canvas_coordinate(x, y);
            let value = tensor.get([0, 0, cy, cx]).copied().unwrap_or(0.0);
            mask.push(value.clamp(0.0, 1.0));
        }
    }

    Ok(ModelOutput {
        label: None,
        width,
        height,
        mask,
    })
}

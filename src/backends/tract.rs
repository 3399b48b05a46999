//! Tract backend
//!
//! Pure Rust inference with no native runtime. CPU only; execution provider
//! settings are ignored.

use super::tensor::{tensor_to_output, transport_to_tensor};
use crate::config::ModelConfig;
use crate::error::{BgRemovalError, Result};
use crate::models::{ModelFiles, PreprocessingConfig};
use crate::segmentation::{MaskPolarity, ModelFactory, ModelOutput, SegmentationModel};
use crate::services::progress::{ProcessingStage, ProgressSender};
use crate::types::TransportImage;
use async_trait::async_trait;
use instant::Instant;
use ndarray::{Array4, Ix4};
use tract_onnx::prelude::*;

type RunnableOnnx = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Builds [`TractModel`] instances
#[derive(Debug, Default, Clone, Copy)]
pub struct TractModelFactory;

#[async_trait]
impl ModelFactory for TractModelFactory {
    async fn initialize(
        &self,
        config: &ModelConfig,
        progress: ProgressSender,
    ) -> Result<Box<dyn SegmentationModel>> {
        if config.execution_provider != crate::config::ExecutionProvider::Auto
            && config.execution_provider != crate::config::ExecutionProvider::Cpu
        {
            log::warn!(
                "Tract runs on CPU only; ignoring execution provider {}",
                config.execution_provider
            );
        }

        let started = Instant::now();
        let files = ModelFiles::locate(config, &progress.scoped(0.0, 0.6)).await?;
        let weights = files.read_weights().await?;
        progress.report(ProcessingStage::ModelLoading, 0.65);

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(weights))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "Tract model ready: {} ({}), {}ms",
            files.onnx_path.display(),
            files.variant,
            started.elapsed().as_millis()
        );
        progress.complete(ProcessingStage::ModelLoading);

        Ok(Box::new(TractModel {
            model,
            preprocessing: files.preprocessing,
            name: format!("tract:{}", files.variant),
        }))
    }
}

/// Segmentation model compiled by tract
///
/// The model emits foreground probability.
pub struct TractModel {
    model: RunnableOnnx,
    preprocessing: PreprocessingConfig,
    name: String,
}

impl TractModel {
    fn run(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self
            .model
            .run(tvec![Tensor::from(input).into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let view = output.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        view.to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| BgRemovalError::inference(format!("Expected 4D output tensor: {e}")))
    }
}

#[async_trait]
impl SegmentationModel for TractModel {
    async fn infer(
        &mut self,
        image: &TransportImage,
        progress: &ProgressSender,
    ) -> Result<Vec<ModelOutput>> {
        let started = Instant::now();
        let (input, letterbox) = transport_to_tensor(image, &self.preprocessing)?;
        progress.report(ProcessingStage::Inference, 0.1);

        let output = self.run(input)?;
        progress.report(ProcessingStage::Inference, 0.9);

        let mask = tensor_to_output(&output, &letterbox, image.width, image.height)?;
        log::debug!("Tract inference complete: {}ms", started.elapsed().as_millis());
        Ok(vec![mask])
    }

    fn polarity(&self) -> MaskPolarity {
        MaskPolarity::Foreground
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_invalid_weights_fail_as_model_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();

        let config = ModelConfig {
            spec: crate::models::ModelSpec {
                source: crate::models::ModelSource::Path(path),
                variant: None,
            },
            ..ModelConfig::default()
        };
        let err = TractModelFactory
            .initialize(&config, ProgressSender::disabled())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BgRemovalError::Model(_)));
    }
}

//! ONNX Runtime backend
//!
//! Builds an `ort` session from the resolved model weights and runs the
//! letterboxed transport image through it. Execution providers are chosen
//! from [`ExecutionProvider`] with availability checks and a CPU fallback.

use super::tensor::{tensor_to_output, transport_to_tensor};
use crate::config::{ExecutionProvider, ModelConfig};
use crate::error::{BgRemovalError, Result};
use crate::models::{ModelFiles, PreprocessingConfig};
use crate::segmentation::{MaskPolarity, ModelFactory, ModelOutput, SegmentationModel};
use crate::services::progress::{ProcessingStage, ProgressSender};
use crate::types::TransportImage;
use async_trait::async_trait;
use instant::Instant;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;

/// Builds [`OnnxModel`] instances
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxModelFactory;

impl OnnxModelFactory {
    /// Execution providers with availability status and a description
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda = OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
            .unwrap_or(false);
        let coreml = OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }
}

#[async_trait]
impl ModelFactory for OnnxModelFactory {
    async fn initialize(
        &self,
        config: &ModelConfig,
        progress: ProgressSender,
    ) -> Result<Box<dyn SegmentationModel>> {
        let started = Instant::now();
        let files = ModelFiles::locate(config, &progress.scoped(0.0, 0.8)).await?;
        let weights = files.read_weights().await?;
        progress.report(ProcessingStage::ModelLoading, 0.85);

        let session = build_session(config, &weights)?;
        log::info!(
            "ONNX session ready: {} ({}), {:.0}ms",
            files.onnx_path.display(),
            files.variant,
            started.elapsed().as_secs_f64() * 1000.0
        );
        progress.complete(ProcessingStage::ModelLoading);

        Ok(Box::new(OnnxModel {
            session,
            preprocessing: files.preprocessing,
            name: format!("onnx:{}", files.variant),
        }))
    }
}

fn build_session(config: &ModelConfig, weights: &[u8]) -> Result<Session> {
    let builder = Session::builder()
        .map_err(|e| BgRemovalError::model(format!("Failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| BgRemovalError::model(format!("Failed to set optimization level: {e}")))?;

    let builder = configure_providers(builder, config.execution_provider)?;
    let (intra_threads, inter_threads) = thread_counts(config);
    log::debug!("Threading: {intra_threads} intra-op, {inter_threads} inter-op");

    builder
        .with_intra_threads(intra_threads)
        .map_err(|e| BgRemovalError::model(format!("Failed to set intra threads: {e}")))?
        .with_inter_threads(inter_threads)
        .map_err(|e| BgRemovalError::model(format!("Failed to set inter threads: {e}")))?
        .commit_from_memory(weights)
        .map_err(|e| BgRemovalError::model(format!("Failed to create session from model data: {e}")))
}

fn configure_providers(
    builder: SessionBuilder,
    provider: ExecutionProvider,
) -> Result<SessionBuilder> {
    let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();

    if matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cuda) {
        let cuda = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
            log::info!("Using CUDA execution provider");
            providers.push(cuda.build());
        } else if provider == ExecutionProvider::Cuda {
            log::warn!("CUDA execution provider requested but not available, falling back to CPU");
        }
    }

    if matches!(provider, ExecutionProvider::Auto | ExecutionProvider::CoreMl) {
        let coreml = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
            log::info!("Using CoreML execution provider");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        } else if provider == ExecutionProvider::CoreMl {
            log::warn!("CoreML execution provider requested but not available, falling back to CPU");
        }
    }

    if providers.is_empty() {
        log::info!("Using CPU execution provider");
        return Ok(builder);
    }

    builder
        .with_execution_providers(providers)
        .map_err(|e| BgRemovalError::model(format!("Failed to set execution providers: {e}")))
}

/// Resolve `0` thread counts to values based on available parallelism
fn thread_counts(config: &ModelConfig) -> (usize, usize) {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4);
    let intra = if config.intra_threads > 0 {
        config.intra_threads
    } else {
        cores
    };
    let inter = if config.inter_threads > 0 {
        config.inter_threads
    } else {
        (cores / 4).max(1)
    };
    (intra, inter)
}

/// Segmentation model running in an ONNX Runtime session
///
/// The model emits foreground probability.
pub struct OnnxModel {
    session: Session,
    preprocessing: PreprocessingConfig,
    name: String,
}

impl OnnxModel {
    fn run(&mut self, input: Array4<f32>) -> Result<Array4<f32>> {
        let input_value = Value::from_array(input)
            .map_err(|e| BgRemovalError::inference(format!("Failed to convert input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?
            .to_string();
        let view = outputs
            .get(first_key.as_str())
            .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::inference(format!("Failed to extract output tensor: {e}")))?;

        view.to_owned().into_dimensionality::<Ix4>().map_err(|e| {
            BgRemovalError::inference(format!("Expected 4D output tensor: {e}"))
        })
    }
}

#[async_trait]
impl SegmentationModel for OnnxModel {
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
        log::debug!(
            "ONNX inference complete: {:.2}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
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

    #[test]
    fn test_cpu_provider_always_listed() {
        let providers = OnnxModelFactory::list_providers();
        assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
        assert_eq!(providers.len(), 3);
    }

    #[test]
    fn test_thread_counts() {
        let config = ModelConfig {
            intra_threads: 4,
            inter_threads: 2,
            ..ModelConfig::default()
        };
        assert_eq!(thread_counts(&config), (4, 2));

        let auto = ModelConfig {
            intra_threads: 0,
            inter_threads: 0,
            ..ModelConfig::default()
        };
        let (intra, inter) = thread_counts(&auto);
        assert!(intra >= 1 && inter >= 1);
    }

    #[tokio::test]
    async fn test_missing_model_path_fails_initialization() {
        let config = ModelConfig {
            spec: crate::models::ModelSpec {
                source: crate::models::ModelSource::Path("/nonexistent/model.onnx".into()),
                variant: None,
            },
            ..ModelConfig::default()
        };
        let result = OnnxModelFactory
            .initialize(&config, ProgressSender::disabled())
            .await;
        assert!(result.is_err());
    }
}

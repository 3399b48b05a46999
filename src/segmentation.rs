//! Segmentation invoker and the model contract it drives
//!
//! The model is a black box `TransportImage -> Vec<ModelOutput>`. The invoker
//! owns the single model instance, constructs it on first use, re-encodes the
//! normalized buffer into the transport format, and validates what comes
//! back before handing a `SegmentationMask` to the compositor.

use crate::config::{ModelConfig, PipelineConfig};
use crate::encoder::OutputEncoder;
use crate::error::{BgRemovalError, Result};
use crate::services::progress::{ProcessingStage, ProgressSender};
use crate::types::{ImageHandle, SegmentationMask, TransportImage};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

/// Progress reached once the model instance is ready
const MODEL_READY: f32 = 0.4;
/// Progress reached once the transport image is encoded
const TRANSPORT_READY: f32 = 0.5;
/// Progress reached once the model returned
const INFERENCE_DONE: f32 = 0.9;

/// Meaning of high scores in a model's raw mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolarity {
    /// High score means background (the pipeline convention)
    Background,
    /// High score means foreground; inverted before compositing
    Foreground,
}

/// One mask returned by a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    /// Class label for multi-class models
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Row-major scores, `width * height` entries
    pub mask: Vec<f32>,
}

/// A constructed segmentation model
#[async_trait]
pub trait SegmentationModel: Send {
    /// Run the model on an encoded image
    ///
    /// Implementations may report progress through `progress` at any cadence.
    async fn infer(
        &mut self,
        image: &TransportImage,
        progress: &ProgressSender,
    ) -> Result<Vec<ModelOutput>>;

    /// How to read this model's scores
    fn polarity(&self) -> MaskPolarity;

    /// Name for logs
    fn name(&self) -> &str;
}

/// Builds model instances
#[async_trait]
pub trait ModelFactory: Send + Sync {
    /// Construct a model (fetching and compiling weights as needed)
    async fn initialize(
        &self,
        config: &ModelConfig,
        progress: ProgressSender,
    ) -> Result<Box<dyn SegmentationModel>>;
}

static GLOBAL_INVOKER: OnceLock<Arc<SegmentationInvoker>> = OnceLock::new();

/// Owns the model instance and runs inference on normalized buffers
pub struct SegmentationInvoker {
    factory: Arc<dyn ModelFactory>,
    config: ModelConfig,
    transport_quality: u8,
    instance: OnceCell<Mutex<Box<dyn SegmentationModel>>>,
}

impl std::fmt::Debug for SegmentationInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationInvoker")
            .field("model", &self.config.display_name())
            .field("transport_quality", &self.transport_quality)
            .field("loaded", &self.is_model_loaded())
            .finish_non_exhaustive()
    }
}

impl SegmentationInvoker {
    /// Invoker with its own model instance
    #[must_use]
    pub fn new(factory: Arc<dyn ModelFactory>, config: ModelConfig, transport_quality: u8) -> Self {
        Self {
            factory,
            config,
            transport_quality,
            instance: OnceCell::new(),
        }
    }

    /// Invoker built from a pipeline configuration
    #[must_use]
    pub fn from_config(factory: Arc<dyn ModelFactory>, config: &PipelineConfig) -> Self {
        Self::new(factory, config.model.clone(), config.transport_quality)
    }

    /// The process-wide invoker
    ///
    /// The first call decides the factory and configuration; later calls
    /// return the same instance and ignore their arguments.
    #[must_use]
    pub fn global(factory: Arc<dyn ModelFactory>, config: &PipelineConfig) -> Arc<Self> {
        Arc::clone(GLOBAL_INVOKER.get_or_init(|| Arc::new(Self::from_config(factory, config))))
    }

    /// Whether the model instance has been constructed
    #[must_use]
    pub fn is_model_loaded(&self) -> bool {
        self.instance.initialized()
    }

    /// Produce a background mask for `buffer`
    ///
    /// Progress runs from 0 to 1: model loading covers 0-0.4, the transport
    /// encode ends at 0.5, inference covers 0.5-0.9 and validation ends at 1.
    ///
    /// # Errors
    /// - Model construction failed (`ResourceExhaustion`); a later call retries
    /// - Model returned nothing, a malformed result, or a mask whose length
    ///   does not match the buffer (`Inference`)
    #[instrument(skip_all, fields(width = buffer.width(), height = buffer.height()))]
    pub async fn segment(
        &self,
        buffer: &ImageHandle,
        progress: &ProgressSender,
    ) -> Result<SegmentationMask> {
        progress.report(ProcessingStage::ModelLoading, 0.0);
        let loading = progress.scoped(0.0, MODEL_READY);
        let instance = self.instance_or_init(&loading).await?;
        loading.complete(ProcessingStage::ModelLoading);

        let transport = OutputEncoder::encode_transport(buffer, self.transport_quality)
            .map_err(|e| BgRemovalError::inference(format!("Transport encode failed: {}", e)))?;
        progress.report(ProcessingStage::TransportEncoding, TRANSPORT_READY);

        let inference = progress.scoped(TRANSPORT_READY, INFERENCE_DONE);
        let (outputs, polarity) = {
            let mut model = instance.lock().await;
            debug!(model = model.name(), bytes = transport.bytes.len(), "running inference");
            let outputs = model
                .infer(&transport, &inference)
                .await
                .map_err(into_inference_error)?;
            (outputs, model.polarity())
        };
        inference.complete(ProcessingStage::Inference);

        let mask = validate_outputs(outputs, polarity, buffer)?;
        progress.complete(ProcessingStage::MaskValidation);
        Ok(mask)
    }

    async fn instance_or_init(
        &self,
        loading: &ProgressSender,
    ) -> Result<&Mutex<Box<dyn SegmentationModel>>> {
        self.instance
            .get_or_try_init(|| async {
                info!(model = %self.config.display_name(), "initializing segmentation model");
                let started = instant::Instant::now();
                let model = self
                    .factory
                    .initialize(&self.config, loading.clone())
                    .await
                    .map_err(|e| match e {
                        BgRemovalError::ResourceExhaustion(_) => e,
                        other => BgRemovalError::resource_exhaustion(format!(
                            "Failed to load segmentation model: {}",
                            other
                        )),
                    })?;
                info!(
                    model = model.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "segmentation model ready"
                );
                Ok(Mutex::new(model))
            })
            .await
    }
}

fn into_inference_error(error: BgRemovalError) -> BgRemovalError {
    match error {
        BgRemovalError::Inference(_) => error,
        other => BgRemovalError::inference(other.to_string()),
    }
}

/// Check model output against the buffer and normalize polarity
fn validate_outputs(
    outputs: Vec<ModelOutput>,
    polarity: MaskPolarity,
    buffer: &ImageHandle,
) -> Result<SegmentationMask> {
    let output = outputs
        .into_iter()
        .next()
        .ok_or_else(|| BgRemovalError::inference("Model returned no segmentation result"))?;

    if output.mask.is_empty() {
        return Err(BgRemovalError::inference("Model returned an empty mask"));
    }

    let declared = output.width as usize * output.height as usize;
    if declared != output.mask.len() {
        return Err(BgRemovalError::inference(format!(
            "Malformed result: {}x{} mask carries {} values",
            output.width,
            output.height,
            output.mask.len()
        )));
    }

    if output.mask.len() != buffer.pixel_count()
        || (output.width, output.height) != buffer.dimensions()
    {
        return Err(BgRemovalError::inference(format!(
            "Mask length {} ({}x{}) does not match {} pixels ({}x{})",
            output.mask.len(),
            output.width,
            output.height,
            buffer.pixel_count(),
            buffer.width(),
            buffer.height()
        )));
    }

    if output.mask.iter().any(|v| !v.is_finite()) {
        return Err(BgRemovalError::inference("Mask contains non-finite values"));
    }

    let scores = match polarity {
        MaskPolarity::Background => output.mask,
        MaskPolarity::Foreground => output.mask.into_iter().map(|v| 1.0 - v).collect(),
    };

    SegmentationMask::new(output.width, output.height, scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::progress::progress_channel;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Script {
        Constant(f32),
        Empty,
        Length(usize),
        Values(Vec<f32>),
        Fail,
    }

    struct ScriptedModel {
        script: Script,
        polarity: MaskPolarity,
    }

    #[async_trait]
    impl SegmentationModel for ScriptedModel {
        async fn infer(
            &mut self,
            image: &TransportImage,
            progress: &ProgressSender,
        ) -> Result<Vec<ModelOutput>> {
            progress.report(ProcessingStage::Inference, 0.5);
            let (width, height) = (image.width, image.height);
            let mask = match &self.script {
                Script::Constant(v) => vec![*v; image.pixel_count()],
                Script::Empty => return Ok(Vec::new()),
                Script::Length(n) => vec![0.0; *n],
                Script::Values(values) => values.clone(),
                Script::Fail => return Err(BgRemovalError::internal("runtime crashed")),
            };
            Ok(vec![ModelOutput {
                label: None,
                width,
                height,
                mask,
            }])
        }

        fn polarity(&self) -> MaskPolarity {
            self.polarity
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct ScriptedFactory {
        script: Script,
        polarity: MaskPolarity,
        fail_first: AtomicUsize,
        constructions: AtomicUsize,
    }

    impl ScriptedFactory {
        fn new(script: Script) -> Self {
            Self {
                script,
                polarity: MaskPolarity::Background,
                fail_first: AtomicUsize::new(0),
                constructions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelFactory for ScriptedFactory {
        async fn initialize(
            &self,
            _config: &ModelConfig,
            progress: ProgressSender,
        ) -> Result<Box<dyn SegmentationModel>> {
            progress.report(ProcessingStage::ModelLoading, 0.5);
            tokio::task::yield_now().await;
            self.constructions.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(BgRemovalError::model("weights unavailable"));
            }
            Ok(Box::new(ScriptedModel {
                script: self.script.clone(),
                polarity: self.polarity,
            }))
        }
    }

    fn buffer(width: u32, height: u32) -> ImageHandle {
        ImageHandle::new(RgbaImage::from_pixel(width, height, Rgba([120, 80, 40, 255])))
    }

    fn invoker(factory: ScriptedFactory) -> (Arc<ScriptedFactory>, SegmentationInvoker) {
        let factory = Arc::new(factory);
        let invoker = SegmentationInvoker::new(
            Arc::clone(&factory) as Arc<dyn ModelFactory>,
            ModelConfig::default(),
            80,
        );
        (factory, invoker)
    }

    #[tokio::test]
    async fn test_segment_returns_mask_for_buffer() {
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Constant(0.25)));
        assert!(!invoker.is_model_loaded());

        let mask = invoker
            .segment(&buffer(12, 9), &ProgressSender::disabled())
            .await
            .unwrap();
        assert_eq!((mask.width(), mask.height()), (12, 9));
        assert!(mask.scores().iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
        assert!(invoker.is_model_loaded());
    }

    #[tokio::test]
    async fn test_model_constructed_once() {
        let (factory, invoker) = invoker(ScriptedFactory::new(Script::Constant(0.0)));
        for _ in 0..3 {
            invoker
                .segment(&buffer(4, 4), &ProgressSender::disabled())
                .await
                .unwrap();
        }
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_share_construction() {
        let (factory, invoker) = invoker(ScriptedFactory::new(Script::Constant(0.0)));
        let image = buffer(4, 4);
        let disabled = ProgressSender::disabled();
        let (a, b) = tokio::join!(
            invoker.segment(&image, &disabled),
            invoker.segment(&image, &disabled)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_resource_exhaustion_and_retryable() {
        let factory = ScriptedFactory::new(Script::Constant(0.0));
        factory.fail_first.store(1, Ordering::SeqCst);
        let (factory, invoker) = invoker(factory);

        let err = invoker
            .segment(&buffer(4, 4), &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::ResourceExhaustion(_)));
        assert!(!invoker.is_model_loaded());

        invoker
            .segment(&buffer(4, 4), &ProgressSender::disabled())
            .await
            .unwrap();
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_inference_error() {
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Empty));
        let err = invoker
            .segment(&buffer(4, 4), &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[tokio::test]
    async fn test_wrong_length_is_inference_error() {
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Length(15)));
        let err = invoker
            .segment(&buffer(4, 4), &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[tokio::test]
    async fn test_non_finite_scores_are_rejected() {
        let mut values = vec![0.0; 4];
        values[2] = f32::NAN;
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Values(values)));
        let err = invoker
            .segment(&buffer(2, 2), &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[tokio::test]
    async fn test_model_errors_become_inference_errors() {
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Fail));
        let err = invoker
            .segment(&buffer(4, 4), &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
        assert!(err.to_string().contains("runtime crashed"));
    }

    #[tokio::test]
    async fn test_foreground_polarity_is_inverted() {
        let mut factory = ScriptedFactory::new(Script::Values(vec![1.0, 0.0, 0.25, 0.75]));
        factory.polarity = MaskPolarity::Foreground;
        let (_, invoker) = invoker(factory);

        let mask = invoker
            .segment(&buffer(2, 2), &ProgressSender::disabled())
            .await
            .unwrap();
        assert_eq!(mask.scores(), &[0.0, 1.0, 0.75, 0.25]);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_one() {
        let (_, invoker) = invoker(ScriptedFactory::new(Script::Constant(0.0)));
        let (tx, mut rx) = progress_channel();
        invoker.segment(&buffer(4, 4), &tx).await.unwrap();
        drop(tx);

        let mut fractions = Vec::new();
        while let Some(update) = rx.recv().await {
            fractions.push(update.fraction);
        }
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert!((fractions[0] - 0.0).abs() < f32::EPSILON);
        assert!((fractions.last().copied().unwrap() - 1.0).abs() < f32::EPSILON);
        assert!(fractions.iter().any(|&f| (f - MODEL_READY).abs() < 1e-6));
        assert!(fractions.iter().any(|&f| (f - TRANSPORT_READY).abs() < 1e-6));
    }
}

//! Shared fixtures: scripted models, uploads and notice helpers

#![allow(dead_code)]

use async_trait::async_trait;
use bgremove_pipeline::{
    BgRemovalError, ChannelNotifier, MaskPolarity, ModelConfig, ModelFactory, ModelOutput, Notice,
    PipelineConfig, PipelineOrchestrator, ProcessingStage, ProgressSender, Result,
    SegmentationInvoker, SegmentationModel, TransportImage, UploadedFile,
};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// What a [`ScriptedModel`] does on each call
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Left half background, right half foreground
    SplitHalves,
    /// Every pixel gets the same background score
    Constant(f32),
    /// Model reports an error
    Fail,
    /// Model returns no masks
    Empty,
}

/// Pauses a model mid-inference
#[derive(Debug, Default)]
pub struct Gate {
    /// Notified once inference has started
    pub started: Notify,
    /// Inference waits here until notified
    pub release: Notify,
}

pub struct ScriptedModel {
    behaviour: Behaviour,
    gate: Option<Arc<Gate>>,
    delay: Option<Duration>,
}

#[async_trait]
impl SegmentationModel for ScriptedModel {
    async fn infer(
        &mut self,
        image: &TransportImage,
        progress: &ProgressSender,
    ) -> Result<Vec<ModelOutput>> {
        progress.report(ProcessingStage::Inference, 0.5);
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behaviour {
            Behaviour::Fail => Err(BgRemovalError::inference("scripted failure")),
            Behaviour::Empty => Ok(Vec::new()),
            Behaviour::Constant(score) => Ok(vec![ModelOutput {
                label: None,
                width: image.width,
                height: image.height,
                mask: vec![score; image.pixel_count()],
            }]),
            Behaviour::SplitHalves => {
                let width = image.width;
                let half = width / 2;
                let mask = (0..image.height)
                    .flat_map(|_| (0..width).map(move |x| if x < half { 1.0 } else { 0.0 }))
                    .collect();
                Ok(vec![ModelOutput {
                    label: None,
                    width,
                    height: image.height,
                    mask,
                }])
            },
        }
    }

    fn polarity(&self) -> MaskPolarity {
        MaskPolarity::Background
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Factory counting how often it built a model
pub struct ScriptedFactory {
    behaviour: Behaviour,
    gate: Option<Arc<Gate>>,
    delay: Option<Duration>,
    fail_initialization: bool,
    initializations: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            gate: None,
            delay: None,
            fail_initialization: false,
            initializations: AtomicUsize::new(0),
        }
    }

    pub fn gated(behaviour: Behaviour, gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(behaviour)
        }
    }

    /// Inference sleeps for `delay` before answering
    pub fn slow(behaviour: Behaviour, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(behaviour)
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_initialization: true,
            ..Self::new(Behaviour::SplitHalves)
        }
    }

    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelFactory for ScriptedFactory {
    async fn initialize(
        &self,
        _config: &ModelConfig,
        progress: ProgressSender,
    ) -> Result<Box<dyn SegmentationModel>> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        progress.report(ProcessingStage::ModelLoading, 0.5);
        if self.fail_initialization {
            return Err(BgRemovalError::model("weights missing"));
        }
        Ok(Box::new(ScriptedModel {
            behaviour: self.behaviour,
            gate: self.gate.clone(),
            delay: self.delay,
        }))
    }
}

/// An orchestrator wired to a scripted factory and a notice channel
pub struct Harness {
    pub pipeline: PipelineOrchestrator,
    pub factory: Arc<ScriptedFactory>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

impl Harness {
    pub fn new(factory: ScriptedFactory) -> Self {
        Self::with_config(PipelineConfig::default(), factory)
    }

    pub fn with_config(config: PipelineConfig, factory: ScriptedFactory) -> Self {
        let factory = Arc::new(factory);
        let invoker = Arc::new(SegmentationInvoker::from_config(factory.clone(), &config));
        let (notifier, notices) = ChannelNotifier::new();
        let pipeline = PipelineOrchestrator::new(config, invoker, Arc::new(notifier))
            .expect("valid test configuration");
        Self {
            pipeline,
            factory,
            notices,
        }
    }

    /// Titles of every notice emitted since the last call
    pub fn notice_titles(&mut self) -> Vec<String> {
        let mut titles = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            titles.push(notice.title);
        }
        titles
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode test png");
    bytes.into_inner()
}

pub fn png_upload(width: u32, height: u32) -> UploadedFile {
    UploadedFile::new(png_bytes(width, height).into())
        .with_mime_type("image/png")
        .with_name("photo.png")
}

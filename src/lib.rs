#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Pipeline
//!
//! Takes an uploaded image through normalization, segmentation, alpha
//! compositing and PNG export, driven by a small session state machine.
//!
//! ## Features
//!
//! - **Session orchestration**: [`PipelineOrchestrator`] moves a session through
//!   `Empty`, `Loaded`, `Processing`, `Processed` and `Editing`, with progress
//!   published on a watch channel
//! - **Lazy model loading**: [`SegmentationInvoker`] builds the model once, on
//!   the first request, and shares it between sessions
//! - **Multiple Backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Model Management**: models are downloaded from `HuggingFace` and cached on disk
//! - **Input sources**: files, bytes, data URLs and http(s) URLs
//! - **CLI Integration**: the `bgremove` binary (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_pipeline::{
//!     backends::default_factory, Outcome, PipelineConfig, PipelineOrchestrator, UploadedFile,
//! };
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder().max_dimension(512).build()?;
//! let factory = default_factory(&config.model)?;
//! let pipeline = PipelineOrchestrator::with_factory(config, factory)?;
//!
//! pipeline.upload(UploadedFile::from_path("input.jpg")).await;
//! if pipeline.process().await == Outcome::Applied {
//!     pipeline.download(Path::new(".")).await;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and subscriber setup
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! bgremove-pipeline = { version = "0.1", default-features = false, features = ["tract"] }
//! ```

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod editor;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod resources;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

pub use cache::ModelCache;
pub use compositor::AlphaCompositor;
pub use config::{BackendType, ExecutionProvider, ModelConfig, PipelineConfig, PipelineConfigBuilder};
pub use download::{validate_model_url, ModelDownloader};
pub use editor::{ImageEditor, SolidBackground};
pub use encoder::OutputEncoder;
pub use error::{BgRemovalError, ErrorKind, Result};
pub use loader::{ImageLoader, ImageSource, UploadedFile};
pub use models::{ModelSource, ModelSpec, DEFAULT_MODEL_URL};
pub use normalizer::Normalizer;
pub use orchestrator::{Affordances, Outcome, Phase, PipelineOrchestrator, PipelineState};
pub use resources::TempArtifact;
pub use segmentation::{MaskPolarity, ModelFactory, ModelOutput, SegmentationInvoker, SegmentationModel};
pub use services::{
    progress_channel, ChannelNotifier, LogNotifier, Notice, NotificationSink, ProcessingStage,
    ProgressSender, ProgressUpdate,
};
pub use types::{
    EncodedImage, ImageHandle, OutputFormat, ProcessedImage, ProcessingTimings, SegmentationMask,
    TransportImage,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingGuard, TracingOutput};

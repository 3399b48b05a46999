//! `bgremove`: remove the background from one image
//!
//! Runs a single orchestrator session: upload, process, optional background
//! colour, download.

use super::config::CliConfigBuilder;
use crate::backends::{available_backends, default_factory};
use crate::cache::ModelCache;
use crate::download::{validate_model_url, ModelDownloader};
use crate::editor::SolidBackground;
use crate::loader::{ImageSource, UploadedFile};
use crate::models::DEFAULT_MODEL_URL;
use crate::orchestrator::{Outcome, PipelineOrchestrator, PipelineState};
use crate::segmentation::SegmentationInvoker;
use crate::services::notification::LogNotifier;
use crate::services::progress::{progress_channel, ProcessingStage};
use crate::tracing_config::{init_cli_tracing, spans};
use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Instrument};

/// Remove image backgrounds and export transparent PNGs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image: file path, http(s) URL, data URL, or "-" for stdin
    #[arg(
        value_name = "INPUT",
        required_unless_present_any = &["show_providers", "only_download", "list_models", "clear_cache", "show_cache_dir"]
    )]
    pub input: Option<String>,

    /// Output directory for processed-image.png
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Larger-side bound applied before inference (and to the output)
    #[arg(long, value_name = "N")]
    pub max_dimension: Option<u32>,

    /// Model URL, model directory, .onnx file, or cached model id
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp16, fp32)
    #[arg(long)]
    pub variant: Option<String>,

    /// Inference backend (onnx, tract)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Inference threads (0 = runtime default)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Fill the removed background with a colour (#rrggbb)
    #[arg(long, value_name = "COLOR")]
    pub background_color: Option<String>,

    /// JSON pipeline configuration; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Show backends and execution providers, then exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model (--model URL or the default) and exit
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Remove cached models (only --model when given) and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Print the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// -v: debug, -vv: trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_providers();
        return Ok(());
    }
    if cli.show_cache_dir {
        let cache = ModelCache::new(cli.cache_dir.as_deref())?;
        println!("{}", cache.cache_dir().display());
        return Ok(());
    }
    if cli.list_models {
        return list_models(&cli);
    }
    if cli.clear_cache {
        return clear_cache(&cli);
    }
    if cli.only_download {
        return download_only(&cli).await;
    }

    let Some(input) = cli.input.clone() else {
        bail!("An input image is required");
    };
    let config = CliConfigBuilder::from_cli(&cli)?;
    let output_dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
    if !output_dir.is_dir() {
        bail!("Output directory does not exist: {}", output_dir.display());
    }

    let factory = default_factory(&config.model)?;
    let invoker = SegmentationInvoker::global(factory, &config);
    let orchestrator = PipelineOrchestrator::new(config, invoker, Arc::new(LogNotifier))?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = spans::session(
        &session_id,
        &orchestrator.config().model.display_name(),
        &orchestrator.config().model.backend.to_string(),
    );
    run_session(&orchestrator, &cli, &input, &output_dir)
        .instrument(span)
        .await
}

async fn run_session(
    orchestrator: &PipelineOrchestrator,
    cli: &Cli,
    input: &str,
    output_dir: &Path,
) -> Result<()> {
    let started = instant::Instant::now();
    let file = uploaded_file(input)?;
    let upload = orchestrator.upload(file).instrument(spans::input(input)).await;
    expect_applied(upload, "upload")?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    bar.set_message("Removing background");

    let mut states = orchestrator.subscribe();
    let watcher_bar = bar.clone();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let PipelineState::Processing { progress } = state else {
                break;
            };
            watcher_bar.set_position(progress.into());
        }
    });

    let outcome = orchestrator.process().await;
    watcher.abort();
    if outcome.is_applied() {
        bar.finish_with_message("Background removed");
    } else {
        bar.abandon_with_message("Processing failed");
    }
    expect_applied(outcome, "process")?;

    if let Some(color) = &cli.background_color {
        let editor = SolidBackground::parse_hex(color)?;
        expect_applied(orchestrator.edit(), "edit")?;
        expect_applied(orchestrator.apply_edit(&editor).await, "apply background colour")?;
        expect_applied(orchestrator.back(), "finish editing")?;
    }

    expect_applied(orchestrator.download(output_dir).await, "download")?;
    let target = output_dir.join(&orchestrator.config().download_file_name);
    if let Some(timings) = orchestrator.last_timings() {
        info!("{}", timings.summary());
    }
    println!(
        "Saved {} in {:.2}s",
        target.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn uploaded_file(input: &str) -> Result<UploadedFile> {
    if input == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .context("Failed to read image from stdin")?;
        return Ok(UploadedFile::new(ImageSource::Bytes(bytes)).with_name("stdin"));
    }
    if input.starts_with("data:") {
        return Ok(UploadedFile::new(ImageSource::DataUrl(input.to_string())));
    }
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(UploadedFile::new(ImageSource::Url(input.to_string())).with_name(input));
    }

    let path = Path::new(input);
    if !path.exists() {
        bail!("Input file does not exist: {}", path.display());
    }
    Ok(UploadedFile::from_path(path))
}

fn expect_applied(outcome: Outcome, operation: &str) -> Result<()> {
    match outcome {
        Outcome::Applied => Ok(()),
        Outcome::Rejected { reason } => bail!("Cannot {}: {}", operation, reason),
        Outcome::Failed { kind } => bail!("Failed to {}: {}", operation, kind),
        Outcome::Discarded => bail!("{} was discarded", operation),
    }
}

fn show_providers() {
    println!("Backends compiled in:");
    for backend in available_backends() {
        println!("  - {}", backend);
    }

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxModelFactory::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  - {}: {} ({})", name, status, description);
        }
    }

    #[cfg(feature = "tract")]
    println!("\nTract: CPU only, pure Rust");
}

fn list_models(cli: &Cli) -> Result<()> {
    let cache = ModelCache::new(cli.cache_dir.as_deref())?;
    let models = cache.list_cached_models()?;
    if models.is_empty() {
        println!("No cached models in {}", cache.cache_dir().display());
        println!("Download one with: bgremove --only-download --model {}", DEFAULT_MODEL_URL);
        return Ok(());
    }
    for model in models {
        println!("{}  {}", model, cache.model_path(&model).display());
    }
    Ok(())
}

fn clear_cache(cli: &Cli) -> Result<()> {
    let cache = ModelCache::new(cli.cache_dir.as_deref())?;
    let targets = match &cli.model {
        Some(model) if model.starts_with("https://") => vec![ModelCache::url_to_model_id(model)],
        Some(model) => vec![model.clone()],
        None => cache.list_cached_models()?,
    };

    let mut removed = 0;
    for model_id in &targets {
        if cache.remove_model(model_id)? {
            removed += 1;
        }
    }
    println!("Removed {} cached model(s)", removed);
    Ok(())
}

async fn download_only(cli: &Cli) -> Result<()> {
    let url = cli.model.as_deref().unwrap_or(DEFAULT_MODEL_URL);
    validate_model_url(url)?;

    let downloader = ModelDownloader::new(ModelCache::new(cli.cache_dir.as_deref())?)?;
    let bar = ProgressBar::new(100);
    bar.set_message("Downloading model");

    let (progress, mut updates) = progress_channel();
    let watcher_bar = bar.clone();
    let watcher = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            watcher_bar.set_position(update.percent().into());
        }
    });

    let result = downloader.download_model(url, &progress).await;
    progress.complete(ProcessingStage::ModelDownload);
    drop(progress);
    let _ = watcher.await;

    let model_id = result?;
    bar.finish_with_message("Model ready");
    println!(
        "Cached {} at {}",
        model_id,
        downloader.cache().model_path(&model_id).display()
    );
    Ok(())
}

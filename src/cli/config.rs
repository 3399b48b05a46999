//! Conversion of CLI arguments into a pipeline configuration

use crate::cli::main_impl::Cli;
use crate::config::{BackendType, ExecutionProvider, PipelineConfig};
use crate::models::{ModelSource, ModelSpec};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Start from `--config` (or defaults) and apply command-line overrides
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfig::builder()
            .max_dimension(cli.max_dimension.unwrap_or(base.max_dimension))
            .transport_quality(base.transport_quality)
            .backend(base.model.backend)
            .execution_provider(base.model.execution_provider)
            .intra_threads(base.model.intra_threads)
            .inter_threads(base.model.inter_threads)
            .download_file_name(base.download_file_name.clone());

        let mut spec = base.model.spec.clone();
        if let Some(model) = &cli.model {
            spec = ModelSpec {
                source: ModelSource::parse(model),
                variant: spec.variant,
            };
        }
        if let Some(variant) = &cli.variant {
            spec.variant = Some(variant.clone());
        }
        builder = builder.model_spec(spec);

        if let Some(backend) = &cli.backend {
            let backend: BackendType = backend.parse().context("Invalid --backend")?;
            builder = builder.backend(backend);
        }
        if let Some(provider) = &cli.execution_provider {
            let provider: ExecutionProvider =
                provider.parse().context("Invalid --execution-provider")?;
            builder = builder.execution_provider(provider);
        }
        if let Some(threads) = cli.threads {
            builder = builder.num_threads(threads);
        }
        if let Some(dir) = cli.cache_dir.as_ref().or(base.model.cache_dir.as_ref()) {
            builder = builder.cache_dir(dir.clone());
        }

        builder.build().context("Invalid configuration")
    }
}

//! Configuration types for the background removal pipeline

use crate::error::{BgRemovalError, Result};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bound on the larger image side before inference
pub const DEFAULT_MAX_DIMENSION: u32 = 512;

/// Default JPEG quality of the pre-inference transport re-encode
pub const DEFAULT_TRANSPORT_QUALITY: u8 = 80;

/// File name used when exporting the processed image
pub const DEFAULT_DOWNLOAD_FILE_NAME: &str = "processed-image.png";

/// Environment variable overriding the model cache directory
pub const CACHE_DIR_ENV: &str = "BGREMOVE_CACHE_DIR";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime (native, hardware accelerated)
    #[default]
    Onnx,
    /// Tract (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{}'. Expected one of: onnx, tract",
                other
            ))),
        }
    }
}

/// Settings handed to `ModelFactory::initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Where the model weights come from
    pub spec: ModelSpec,

    /// Inference engine
    pub backend: BackendType,

    /// Hardware hint for the ONNX backend
    pub execution_provider: ExecutionProvider,

    /// Threads used inside a single operator (0 = runtime default)
    pub intra_threads: usize,

    /// Threads used across independent operators (0 = runtime default)
    pub inter_threads: usize,

    /// Model cache location override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            spec: ModelSpec::default(),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 4,
            inter_threads: 1,
            cache_dir: None,
        }
    }
}

impl ModelConfig {
    /// Short identifier for logs
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.spec.source.display_name(), self.backend)
    }
}

/// Configuration for a pipeline session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Larger-side bound applied by the normalizer
    pub max_dimension: u32,

    /// JPEG quality (1-100) for the transport image handed to the model
    pub transport_quality: u8,

    /// Segmentation model settings
    pub model: ModelConfig,

    /// File name used by `download`
    pub download_file_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            transport_quality: DEFAULT_TRANSPORT_QUALITY,
            model: ModelConfig::default(),
            download_file_name: DEFAULT_DOWNLOAD_FILE_NAME.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use bgremove_pipeline::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .max_dimension(1024)
    ///     .transport_quality(90)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_dimension, 1024);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_dimension` is zero
    /// - `transport_quality` outside 1-100
    /// - Empty download file name
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(BgRemovalError::config_value_error(
                "max dimension",
                self.max_dimension,
                "1 or greater",
                Some(DEFAULT_MAX_DIMENSION),
            ));
        }

        if self.transport_quality == 0 || self.transport_quality > 100 {
            return Err(BgRemovalError::config_value_error(
                "transport quality",
                self.transport_quality,
                "1-100",
                Some(DEFAULT_TRANSPORT_QUALITY),
            ));
        }

        if self.download_file_name.trim().is_empty() {
            return Err(BgRemovalError::invalid_config(
                "Download file name must not be empty",
            ));
        }

        Ok(())
    }

    /// Load and validate a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            BgRemovalError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    /// - Serialization failure
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BgRemovalError::internal(format!("Failed to serialize config: {}", e)))
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the normalizer's larger-side bound
    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    /// Set the transport JPEG quality
    #[must_use]
    pub fn transport_quality(mut self, quality: u8) -> Self {
        self.config.transport_quality = quality.min(100);
        self
    }

    /// Set the model specification
    #[must_use]
    pub fn model_spec(mut self, spec: ModelSpec) -> Self {
        self.config.model.spec = spec;
        self
    }

    /// Set the inference backend
    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.model.backend = backend;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.model.execution_provider = provider;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.model.intra_threads = threads;
        self
    }

    /// Set number of inter-op threads
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.model.inter_threads = threads;
        self
    }

    /// Set both thread counts from a total
    ///
    /// Intra-op gets `threads`, inter-op gets `threads / 2` (minimum 1).
    /// Zero leaves both to the runtime.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.model.intra_threads = threads;
        self.config.model.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Override the model cache directory
    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model.cache_dir = Some(dir.into());
        self
    }

    /// Set the download file name
    #[must_use]
    pub fn download_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.download_file_name = name.into();
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelSource;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_dimension, 512);
        assert_eq!(config.transport_quality, 80);
        assert_eq!(config.download_file_name, "processed-image.png");
        assert_eq!(config.model.intra_threads, 4);
        assert_eq!(config.model.backend, BackendType::Onnx);
        assert_eq!(config.model.execution_provider, ExecutionProvider::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::builder()
            .max_dimension(1024)
            .transport_quality(95)
            .backend(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .download_file_name("cutout.png")
            .build()
            .unwrap();

        assert_eq!(config.max_dimension, 1024);
        assert_eq!(config.transport_quality, 95);
        assert_eq!(config.model.backend, BackendType::Tract);
        assert_eq!(config.model.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.download_file_name, "cutout.png");
    }

    #[test]
    fn test_config_validation() {
        let result = PipelineConfig::builder().max_dimension(0).build();
        assert!(matches!(result, Err(BgRemovalError::InvalidConfig(_))));

        let result = PipelineConfig::builder().transport_quality(0).build();
        assert!(result.is_err());

        let result = PipelineConfig::builder().download_file_name("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_quality_clamping() {
        let config = PipelineConfig::builder()
            .transport_quality(250)
            .build()
            .unwrap();
        assert_eq!(config.transport_quality, 100);
    }

    #[test]
    fn test_builder_thread_methods() {
        let config = PipelineConfig::builder().num_threads(8).build().unwrap();
        assert_eq!(config.model.intra_threads, 8);
        assert_eq!(config.model.inter_threads, 4);

        let config = PipelineConfig::builder().num_threads(1).build().unwrap();
        assert_eq!(config.model.inter_threads, 1);

        let config = PipelineConfig::builder().num_threads(0).build().unwrap();
        assert_eq!(config.model.intra_threads, 0);
        assert_eq!(config.model.inter_threads, 0);
    }

    #[test]
    fn test_execution_provider_parsing() {
        assert_eq!("CUDA".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Cuda);
        assert_eq!("coreml".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert!("metal".parse::<ExecutionProvider>().is_err());
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
    }

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert_eq!("Onnx".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert!("torch".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_model_source() {
        let config = PipelineConfig::builder()
            .model_spec(ModelSpec {
                source: ModelSource::Path(PathBuf::from("/models/isnet")),
                variant: Some("fp32".to_string()),
            })
            .build()
            .unwrap();

        let json = config.to_json_string().unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "max_dimension": 256, "model": {{ "backend": "tract" }} }}"#).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_dimension, 256);
        assert_eq!(config.model.backend, BackendType::Tract);
        assert_eq!(config.transport_quality, DEFAULT_TRANSPORT_QUALITY);
        assert_eq!(config.model.intra_threads, 4);
    }

    #[test]
    fn test_from_json_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "max_dimension": 0 }}"#).unwrap();
        assert!(PipelineConfig::from_json_file(file.path()).is_err());

        let missing = PipelineConfig::from_json_file("/nonexistent/bgremove.json");
        assert!(matches!(missing, Err(BgRemovalError::Io(_))));
    }
}

//! Model source resolution
//!
//! Turns a `ModelSpec` into concrete files on disk: the ONNX weights for the
//! selected variant plus the preprocessing parameters the model expects.

use crate::cache::ModelCache;
use crate::config::{ExecutionProvider, ModelConfig};
use crate::download::ModelDownloader;
use crate::error::{BgRemovalError, Result};
use crate::services::progress::ProgressSender;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Repository used when no model is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Where model weights come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// An `.onnx` file, or a model directory with `onnx/` and config files
    Path(PathBuf),
    /// `HuggingFace` repository URL, downloaded into the cache on first use
    HuggingFace(String),
    /// Model already present in the cache, by id
    Cached(String),
}

impl ModelSource {
    /// Display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Path(path) => format!(
                "path:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::HuggingFace(url) => format!("hf:{}", ModelCache::url_to_model_id(url)),
            Self::Cached(model_id) => format!("cached:{}", model_id),
        }
    }

    /// Interpret a command-line model argument
    ///
    /// URLs become `HuggingFace`, existing paths become `Path`, anything else
    /// is treated as a cache id.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.starts_with("https://") || value.starts_with("http://") {
            Self::HuggingFace(value.to_string())
        } else if Path::new(value).exists() {
            Self::Path(PathBuf::from(value))
        } else {
            Self::Cached(value.to_string())
        }
    }
}

/// Model source plus optional variant (`fp32`, `fp16`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::HuggingFace(DEFAULT_MODEL_URL.to_string()),
            variant: None,
        }
    }
}

/// Input geometry and normalization expected by a model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in `[0, 1]` units
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in `[0, 1]` units
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Parse a `HuggingFace` `preprocessor_config.json`
    ///
    /// `image_mean` / `image_std` are given in 0-255 units and converted.
    ///
    /// # Errors
    /// - Malformed JSON or missing/invalid fields (`Model`)
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content).map_err(|e| {
            BgRemovalError::model(format!("Failed to parse preprocessor_config.json: {}", e))
        })?;

        let size = value
            .get("size")
            .ok_or_else(|| BgRemovalError::model("Missing size in preprocessor config"))?;
        let height = Self::dimension(size, "height")?;
        let width = Self::dimension(size, "width")?;

        Ok(Self {
            target_size: [height, width],
            normalization_mean: Self::channels(&value, "image_mean")?,
            normalization_std: Self::channels(&value, "image_std")?,
        })
    }

    fn dimension(size: &serde_json::Value, key: &str) -> Result<u32> {
        size.get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|&v| v > 0)
            .ok_or_else(|| {
                BgRemovalError::model(format!("Missing or invalid {} in size config", key))
            })
    }

    fn channels(value: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
        let values: Vec<f32> = value
            .get(key)
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                BgRemovalError::model(format!("Missing or invalid {} in preprocessor config", key))
            })?
            .iter()
            .filter_map(serde_json::Value::as_f64)
            .map(|v| (v / 255.0) as f32)
            .collect();

        match values.as_slice() {
            [a, b, c, ..] => Ok([*a, *b, *c]),
            _ => Err(BgRemovalError::model(format!(
                "{} must have at least 3 numeric values",
                key
            ))),
        }
    }
}

/// Concrete files backing a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    /// Path to the ONNX weights
    pub onnx_path: PathBuf,
    /// Resolved variant name
    pub variant: String,
    pub preprocessing: PreprocessingConfig,
}

impl ModelFiles {
    /// Resolve weights and preprocessing for `config.spec`, downloading if needed
    ///
    /// # Errors
    /// - Cached model missing, download failure, or unusable model directory
    pub async fn locate(config: &ModelConfig, progress: &ProgressSender) -> Result<Self> {
        let variant = config.spec.variant.as_deref();
        match &config.spec.source {
            ModelSource::Path(path) => Self::resolve(path, variant, config.execution_provider),
            ModelSource::Cached(model_id) => {
                let cache = ModelCache::new(config.cache_dir.as_deref())?;
                if !cache.is_model_cached(model_id) {
                    return Err(BgRemovalError::model(format!(
                        "Model '{}' not found in cache at {}",
                        model_id,
                        cache.cache_dir().display()
                    )));
                }
                Self::resolve(
                    &cache.model_path(model_id),
                    variant,
                    config.execution_provider,
                )
            },
            ModelSource::HuggingFace(url) => {
                let cache = ModelCache::new(config.cache_dir.as_deref())?;
                let downloader = ModelDownloader::new(cache)?;
                let model_id = downloader.download_model(url, progress).await?;
                Self::resolve(
                    &downloader.cache().model_path(&model_id),
                    variant,
                    config.execution_provider,
                )
            },
        }
    }

    /// Resolve an `.onnx` file or a model directory
    ///
    /// A missing `preprocessor_config.json` falls back to
    /// [`PreprocessingConfig::default`].
    ///
    /// # Errors
    /// - Path does not exist, has no ONNX weights, or the requested variant is absent
    pub fn resolve(
        path: &Path,
        variant: Option<&str>,
        provider: ExecutionProvider,
    ) -> Result<Self> {
        if path.is_file() {
            let is_onnx = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
            if !is_onnx {
                return Err(BgRemovalError::model(format!(
                    "Expected an .onnx file, got {}",
                    path.display()
                )));
            }
            let preprocessing = Self::load_preprocessing(path.parent())?;
            return Ok(Self {
                onnx_path: path.to_path_buf(),
                variant: variant.unwrap_or("custom").to_string(),
                preprocessing,
            });
        }

        if !path.is_dir() {
            return Err(BgRemovalError::model(format!(
                "Model path does not exist: {}",
                path.display()
            )));
        }

        let onnx_dir = path.join("onnx");
        let available = available_variants(&onnx_dir);
        let variant = select_variant(&available, variant, provider).ok_or_else(|| {
            if available.is_empty() {
                BgRemovalError::model(format!(
                    "No ONNX model files found in {}",
                    onnx_dir.display()
                ))
            } else {
                BgRemovalError::model(format!(
                    "Requested variant not available in {}. Available: {:?}",
                    path.display(),
                    available
                ))
            }
        })?;

        Ok(Self {
            onnx_path: variant_file(&onnx_dir, &variant),
            preprocessing: Self::load_preprocessing(Some(path))?,
            variant,
        })
    }

    /// Read the ONNX weights into memory
    ///
    /// # Errors
    /// - File cannot be read
    pub async fn read_weights(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.onnx_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("read model weights", &self.onnx_path, &e))
    }

    fn load_preprocessing(dir: Option<&Path>) -> Result<PreprocessingConfig> {
        let Some(config_path) = dir.map(|d| d.join("preprocessor_config.json")) else {
            return Ok(PreprocessingConfig::default());
        };
        if !config_path.exists() {
            log::debug!(
                "No preprocessor config at {}, using defaults",
                config_path.display()
            );
            return Ok(PreprocessingConfig::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| {
            BgRemovalError::file_io_error("read preprocessor_config.json", &config_path, &e)
        })?;
        PreprocessingConfig::from_json(&content)
    }
}

/// Variant names present in an `onnx/` directory
///
/// `model.onnx` is `fp32`, `model_<v>.onnx` is `<v>`.
fn available_variants(onnx_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(onnx_dir) else {
        return Vec::new();
    };

    let mut variants: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter_map(|file_name| {
            if file_name == "model.onnx" {
                Some("fp32".to_string())
            } else {
                file_name
                    .strip_prefix("model_")
                    .and_then(|s| s.strip_suffix(".onnx"))
                    .map(str::to_string)
            }
        })
        .collect();
    variants.sort();
    variants
}

/// Pick a variant: explicit request, then provider preference, then fp16/fp32
fn select_variant(
    available: &[String],
    requested: Option<&str>,
    provider: ExecutionProvider,
) -> Option<String> {
    let has = |name: &str| available.iter().any(|v| v == name);

    if let Some(requested) = requested {
        return has(requested).then(|| requested.to_string());
    }

    let preferred = match provider {
        // CoreML runs fp16 weights poorly
        ExecutionProvider::CoreMl => "fp32",
        ExecutionProvider::Cuda | ExecutionProvider::Cpu => "fp16",
        ExecutionProvider::Auto if cfg!(target_os = "macos") => "fp32",
        ExecutionProvider::Auto => "fp16",
    };
    if has(preferred) {
        return Some(preferred.to_string());
    }

    ["fp16", "fp32"]
        .into_iter()
        .find(|v| has(v))
        .map(str::to_string)
        .or_else(|| available.first().cloned())
}

fn variant_file(onnx_dir: &Path, variant: &str) -> PathBuf {
    match variant {
        "fp32" => onnx_dir.join("model.onnx"),
        other => onnx_dir.join(format!("model_{}.onnx", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ISNET_PREPROCESSOR: &str = r#"{
        "do_normalize": true,
        "image_mean": [128, 128, 128],
        "image_std": [256, 256, 256],
        "size": { "height": 1024, "width": 1024 }
    }"#;

    fn model_dir(variants: &[&str], preprocessor: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("onnx")).unwrap();
        for file in variants {
            fs::write(dir.path().join("onnx").join(file), b"weights").unwrap();
        }
        if let Some(content) = preprocessor {
            fs::write(dir.path().join("preprocessor_config.json"), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_model_source_display_name() {
        assert_eq!(
            ModelSource::Cached("imgly--isnet-general-onnx".to_string()).display_name(),
            "cached:imgly--isnet-general-onnx"
        );
        assert_eq!(
            ModelSource::Path(PathBuf::from("/models/isnet.onnx")).display_name(),
            "path:isnet.onnx"
        );
        assert_eq!(
            ModelSource::HuggingFace(DEFAULT_MODEL_URL.to_string()).display_name(),
            "hf:imgly--isnet-general-onnx"
        );
    }

    #[test]
    fn test_model_source_parse() {
        assert_eq!(
            ModelSource::parse(DEFAULT_MODEL_URL),
            ModelSource::HuggingFace(DEFAULT_MODEL_URL.to_string())
        );
        assert_eq!(
            ModelSource::parse("imgly--isnet-general-onnx"),
            ModelSource::Cached("imgly--isnet-general-onnx".to_string())
        );

        let dir = TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        assert_eq!(ModelSource::parse(&path), ModelSource::Path(dir.path().to_path_buf()));
    }

    #[test]
    fn test_model_spec_default_and_serde() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.source,
            ModelSource::HuggingFace(DEFAULT_MODEL_URL.to_string())
        );
        assert_eq!(spec.variant, None);

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("hugging_face"));
        let parsed: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_preprocessing_config_parsing() {
        let config = PreprocessingConfig::from_json(ISNET_PREPROCESSOR).unwrap();
        assert_eq!(config.target_size, [1024, 1024]);
        assert!((config.normalization_mean[0] - 128.0 / 255.0).abs() < 1e-6);
        assert!((config.normalization_std[2] - 256.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocessing_config_rejects_bad_input() {
        assert!(PreprocessingConfig::from_json("not json").is_err());
        assert!(PreprocessingConfig::from_json(r#"{"image_mean":[1,2,3],"image_std":[1,2,3]}"#)
            .is_err());
        assert!(PreprocessingConfig::from_json(
            r#"{"size":{"height":0,"width":10},"image_mean":[1,2,3],"image_std":[1,2,3]}"#
        )
        .is_err());
        assert!(PreprocessingConfig::from_json(
            r#"{"size":{"height":10,"width":10},"image_mean":[1,2],"image_std":[1,2,3]}"#
        )
        .is_err());
    }

    #[test]
    fn test_resolve_directory_prefers_requested_variant() {
        let dir = model_dir(&["model.onnx", "model_fp16.onnx"], Some(ISNET_PREPROCESSOR));
        let files = ModelFiles::resolve(dir.path(), Some("fp32"), ExecutionProvider::Cpu).unwrap();
        assert_eq!(files.variant, "fp32");
        assert_eq!(files.onnx_path, dir.path().join("onnx").join("model.onnx"));
        assert_eq!(files.preprocessing.target_size, [1024, 1024]);
    }

    #[test]
    fn test_resolve_directory_provider_preference() {
        let dir = model_dir(&["model.onnx", "model_fp16.onnx"], None);
        let cpu = ModelFiles::resolve(dir.path(), None, ExecutionProvider::Cpu).unwrap();
        assert_eq!(cpu.variant, "fp16");
        let coreml = ModelFiles::resolve(dir.path(), None, ExecutionProvider::CoreMl).unwrap();
        assert_eq!(coreml.variant, "fp32");
        assert_eq!(cpu.preprocessing, PreprocessingConfig::default());
    }

    #[test]
    fn test_resolve_falls_back_to_any_variant() {
        let dir = model_dir(&["model_quantized.onnx"], None);
        let files = ModelFiles::resolve(dir.path(), None, ExecutionProvider::Cpu).unwrap();
        assert_eq!(files.variant, "quantized");
        assert_eq!(
            files.onnx_path,
            dir.path().join("onnx").join("model_quantized.onnx")
        );
    }

    #[test]
    fn test_resolve_errors() {
        let dir = model_dir(&["model.onnx"], None);
        assert!(ModelFiles::resolve(dir.path(), Some("fp16"), ExecutionProvider::Cpu).is_err());

        let empty = model_dir(&[], None);
        assert!(ModelFiles::resolve(empty.path(), None, ExecutionProvider::Cpu).is_err());

        assert!(ModelFiles::resolve(
            Path::new("/nonexistent/model"),
            None,
            ExecutionProvider::Cpu
        )
        .is_err());
    }

    #[test]
    fn test_resolve_single_onnx_file() {
        let dir = TempDir::new().unwrap();
        let onnx = dir.path().join("u2net.onnx");
        fs::write(&onnx, b"weights").unwrap();
        let files = ModelFiles::resolve(&onnx, None, ExecutionProvider::Auto).unwrap();
        assert_eq!(files.onnx_path, onnx);
        assert_eq!(files.variant, "custom");

        let not_onnx = dir.path().join("weights.bin");
        fs::write(&not_onnx, b"weights").unwrap();
        assert!(ModelFiles::resolve(&not_onnx, None, ExecutionProvider::Auto).is_err());
    }

    #[tokio::test]
    async fn test_locate_missing_cached_model() {
        let cache_root = TempDir::new().unwrap();
        let config = ModelConfig {
            spec: ModelSpec {
                source: ModelSource::Cached("missing--model".to_string()),
                variant: None,
            },
            cache_dir: Some(cache_root.path().to_path_buf()),
            ..ModelConfig::default()
        };
        let err = ModelFiles::locate(&config, &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
    }

    #[tokio::test]
    async fn test_read_weights() {
        let dir = model_dir(&["model.onnx"], None);
        let files = ModelFiles::resolve(dir.path(), None, ExecutionProvider::Cpu).unwrap();
        assert_eq!(files.read_weights().await.unwrap(), b"weights");
    }
}

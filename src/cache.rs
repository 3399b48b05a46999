//! On-disk cache for downloaded segmentation models
//!
//! Layout: `<cache root>/models/<model id>/{config.json, preprocessor_config.json, onnx/*.onnx}`.

use crate::config::CACHE_DIR_ENV;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the cache, creating its directory if needed
    ///
    /// Location, in order of precedence: `root` (when given), the
    /// `BGREMOVE_CACHE_DIR` environment variable, then the platform cache
    /// directory (`~/.cache/bgremove-pipeline` on Linux).
    ///
    /// # Errors
    /// - No cache directory could be determined
    /// - The directory could not be created
    pub fn new(root: Option<&Path>) -> Result<Self> {
        let cache_dir = match root {
            Some(root) => root.join("models"),
            None => Self::default_cache_dir()?,
        };

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }

        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join("bgremove-pipeline")
            .join("models"))
    }

    /// Cache-safe identifier for a model URL
    ///
    /// `HuggingFace` repositories map to `owner--repo`; anything else maps to
    /// `url-` followed by the first 12 hex digits of its SHA-256.
    ///
    /// ```
    /// use bgremove_pipeline::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        if let Some(repo) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return repo.trim_end_matches('/').replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash_string = format!("url-{:x}", hasher.finalize());
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Whether `model_id` exists and has the expected files
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        let model_path = self.model_path(model_id);
        model_path.exists() && Self::is_valid_model_dir(&model_path)
    }

    /// Directory for `model_id` (may not exist)
    #[must_use]
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove a cached model; returns whether anything was removed
    ///
    /// # Errors
    /// - Directory removal failed
    pub fn remove_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&model_path)
            .map_err(|e| BgRemovalError::file_io_error("remove cached model", &model_path, &e))?;
        log::info!("Removed cached model: {}", model_id);
        Ok(true)
    }

    /// Ids of every complete model in the cache, sorted
    ///
    /// # Errors
    /// - Cache directory cannot be read
    pub fn list_cached_models(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        let mut models: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| Self::is_valid_model_dir(&entry.path()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        models.sort();
        Ok(models)
    }

    fn is_valid_model_dir(model_path: &Path) -> bool {
        model_path.join("config.json").exists()
            && model_path.join("preprocessor_config.json").exists()
            && model_path.join("onnx").is_dir()
    }
}

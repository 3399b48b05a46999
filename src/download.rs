//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a temporary directory inside the cache and moved
//! into place only once every required file has arrived.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::services::progress::{ProcessingStage, ProgressSender};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Configuration files every cached model must have
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX weights to try; at least one must succeed
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Downloads model repositories into a `ModelCache`
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    checksums: HashMap<String, String>,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache,
            checksums: HashMap::new(),
        })
    }

    /// Expected SHA-256 (lowercase hex) per repository-relative file path
    ///
    /// Files without an entry are not verified.
    #[must_use]
    pub fn with_checksums(mut self, checksums: HashMap<String, String>) -> Self {
        self.checksums = checksums;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Ensure the repository at `url` is cached, downloading it if needed
    ///
    /// Returns the model id. Byte progress across all files is reported
    /// through `progress`.
    ///
    /// # Errors
    /// - Unsupported URL (`InvalidConfig`)
    /// - Network failures (`Network`)
    /// - Checksum mismatch (`Model`)
    /// - File system errors (`Io`)
    pub async fn download_model(&self, url: &str, progress: &ProgressSender) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            progress.complete(ProcessingStage::ModelDownload);
            return Ok(model_id);
        }

        log::info!("Downloading model {} from {}", model_id, url);

        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(self.cache.cache_dir())
            .map_err(|e| {
                BgRemovalError::file_io_error(
                    "create download staging directory",
                    self.cache.cache_dir(),
                    &e,
                )
            })?;

        self.download_model_files(url, staging.path(), progress)
            .await?;

        let final_dir = self.cache.model_path(&model_id);
        self.cache.remove_model(&model_id)?;
        tokio::fs::rename(staging.path(), &final_dir)
            .await
            .map_err(|e| {
                BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
            })?;

        progress.complete(ProcessingStage::ModelDownload);
        log::info!("Successfully downloaded model: {}", model_id);
        Ok(model_id)
    }

    async fn download_model_files(
        &self,
        url: &str,
        download_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", url.trim_end_matches('/'));
        let total_files = (REQUIRED_FILES.len() + ONNX_FILES.len()) as f32;
        let mut index = 0.0_f32;

        for file_name in REQUIRED_FILES {
            let file_progress = progress.scoped(index / total_files, (index + 1.0) / total_files);
            index += 1.0;
            self.download_file(&raw_base, file_name, download_dir, &file_progress)
                .await?;
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            let file_progress = progress.scoped(index / total_files, (index + 1.0) / total_files);
            index += 1.0;
            match self
                .download_file(&raw_base, file_path, download_dir, &file_progress)
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => log::warn!("Failed to download {} variant: {}", variant, e),
            }
        }

        if downloaded_models == 0 {
            return Err(BgRemovalError::network(
                "Failed to download any ONNX model variants",
            ));
        }

        Ok(())
    }

    async fn download_file(
        &self,
        raw_base: &str,
        relative_path: &str,
        download_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<()> {
        let url = format!("{}{}", raw_base, relative_path);
        let local_path = download_dir.join(relative_path);
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network(format!("Failed to download {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", &local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = stream.read(&mut buffer).await.map_err(|e| {
                BgRemovalError::network(format!("Failed to read download stream: {}", e))
            })?;
            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", &local_path, &e))?;

            downloaded += bytes_read as u64;
            if let Some(total) = total_size.filter(|&t| t > 0) {
                progress.report(
                    ProcessingStage::ModelDownload,
                    downloaded as f32 / total as f32,
                );
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", &local_path, &e))?;

        if let Some(expected) = self.checksums.get(relative_path) {
            let actual = format!("{:x}", hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(BgRemovalError::model(format!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    relative_path, expected, actual
                )));
            }
        }

        progress.complete(ProcessingStage::ModelDownload);
        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }
}

/// Verify a file against an expected SHA-256 digest
///
/// Returns `Ok(true)` when no digest is given.
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = std::fs::read(file_path).map_err(|e| {
        BgRemovalError::file_io_error("read file for verification", file_path, &e)
    })?;

    let actual = format!("{:x}", Sha256::digest(&contents));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}

/// Check that `url` names a `HuggingFace` repository (`owner/name`)
///
/// # Errors
/// - Empty, non-`HuggingFace`, or malformed URL (`InvalidConfig`)
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL format: {}. Only HuggingFace repositories are supported (https://huggingface.co/...)",
            url
        )));
    };

    let mut parts = repo_path.trim_end_matches('/').split('/');
    let owner = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();
    if owner.is_empty() || name.is_empty() {
        return Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {}. Expected format: https://huggingface.co/owner/repo-name",
            url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/ZhengPeng7/BiRefNet/").is_ok());

        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("https://github.com/user/repo").is_err());
        assert!(validate_model_url("https://huggingface.co/").is_err());
        assert!(validate_model_url("https://huggingface.co/single-part").is_err());
    }

    #[test]
    fn test_verify_file_integrity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

        assert!(verify_file_integrity(file.path(), None).unwrap());
        assert!(verify_file_integrity(file.path(), Some(digest)).unwrap());
        assert!(!verify_file_integrity(file.path(), Some("00ff")).unwrap());
        assert!(verify_file_integrity(Path::new("/nonexistent/file"), Some(digest)).is_err());
    }

    #[tokio::test]
    async fn test_cached_model_skips_download() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::new(Some(temp_dir.path())).unwrap();
        let model_dir = cache.model_path("imgly--isnet-general-onnx");
        std::fs::create_dir_all(model_dir.join("onnx")).unwrap();
        std::fs::write(model_dir.join("config.json"), "{}").unwrap();
        std::fs::write(model_dir.join("preprocessor_config.json"), "{}").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        let id = downloader
            .download_model(
                "https://huggingface.co/imgly/isnet-general-onnx",
                &ProgressSender::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(id, "imgly--isnet-general-onnx");
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_network() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::new(Some(temp_dir.path())).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        let err = downloader
            .download_model("ftp://example.com/model", &ProgressSender::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }
}

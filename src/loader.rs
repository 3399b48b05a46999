//! Image loading: turns an encoded byte source into an `ImageHandle`

use crate::error::{BgRemovalError, Result};
use crate::types::ImageHandle;
use base64::{engine::general_purpose, Engine as _};
use std::path::{Path, PathBuf};

/// Where the encoded image bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Encoded bytes already in memory
    Bytes(Vec<u8>),
    /// File on disk
    File(PathBuf),
    /// `data:<mime>;base64,<payload>` URL
    DataUrl(String),
    /// Remote resource fetched over HTTP(S)
    Url(String),
}

impl ImageSource {
    /// Short description for logs (never includes payload bytes)
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Bytes(bytes) => format!("{} in-memory bytes", bytes.len()),
            Self::File(path) => format!("file {}", path.display()),
            Self::DataUrl(url) => format!("data URL ({} chars)", url.len()),
            Self::Url(url) => format!("url {}", url),
        }
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// A file handed to the upload surface (file picker or drag-and-drop)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Original file name, if known
    pub name: Option<String>,
    /// MIME type declared by the surface, if any
    pub mime_type: Option<String>,
    pub source: ImageSource,
}

impl UploadedFile {
    #[must_use]
    pub fn new(source: ImageSource) -> Self {
        Self {
            name: None,
            mime_type: None,
            source,
        }
    }

    /// Upload from a file path, naming it after the file
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            mime_type: None,
            source: ImageSource::File(path.to_path_buf()),
        }
    }

    #[must_use]
    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Encoded bytes plus whatever MIME type the source itself declared
#[derive(Debug)]
struct Fetched {
    bytes: Vec<u8>,
    declared_mime: Option<String>,
}

/// Whether a MIME type is accepted by the upload surface (`image/*`)
#[must_use]
pub fn is_image_mime(mime: &str) -> bool {
    mime.trim().to_ascii_lowercase().starts_with("image/")
}

/// Decodes encoded sources into RGBA handles
#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
}

impl ImageLoader {
    /// Create a loader
    ///
    /// # Errors
    /// - HTTP client construction failed
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| BgRemovalError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Load and decode an image from `source`
    ///
    /// # Errors
    /// - Source cannot be read (`Io`)
    /// - Bytes are not a supported raster format or are corrupt (`Decode`)
    pub async fn load(&self, source: &ImageSource) -> Result<ImageHandle> {
        let fetched = self.fetch(source).await?;
        Self::decode(&fetched.bytes)
    }

    /// Accept an upload: enforce `image/*`, then decode
    ///
    /// A declared non-image type is rejected before any bytes are read. When
    /// neither the surface nor the source declares a type, the bytes are
    /// sniffed.
    ///
    /// # Errors
    /// - Not an image (`InvalidFileType`)
    /// - Unreadable source (`Io`)
    /// - Corrupt or unsupported image (`Decode`)
    pub async fn load_upload(&self, file: &UploadedFile) -> Result<ImageHandle> {
        if let Some(mime) = &file.mime_type {
            if !is_image_mime(mime) {
                return Err(BgRemovalError::invalid_file_type(mime.clone()));
            }
        }

        let fetched = self.fetch(&file.source).await?;

        if file.mime_type.is_none() {
            match fetched.declared_mime.as_deref() {
                Some(mime) if !is_image_mime(mime) => {
                    return Err(BgRemovalError::invalid_file_type(mime.to_string()));
                },
                Some(_) => {},
                None => {
                    if Self::sniff_mime(&fetched.bytes).is_none() {
                        let name = file.name.as_deref().unwrap_or("upload");
                        return Err(BgRemovalError::invalid_file_type(format!(
                            "{} is not a recognized image",
                            name
                        )));
                    }
                },
            }
        }

        Self::decode(&fetched.bytes)
    }

    /// Guess the MIME type of encoded bytes from their magic number
    #[must_use]
    pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
        image::guess_format(bytes).ok().map(|format| format.to_mime_type())
    }

    /// Decode encoded bytes into an RGBA handle
    ///
    /// The intermediate `DynamicImage` is dropped as soon as the RGBA pixels
    /// have been copied out.
    ///
    /// # Errors
    /// - Empty, corrupt or unsupported data (`Decode`)
    pub fn decode(bytes: &[u8]) -> Result<ImageHandle> {
        if bytes.is_empty() {
            return Err(BgRemovalError::decode("Image data is empty"));
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| BgRemovalError::decode(format!("Failed to decode image: {}", e)))?;
        let rgba = decoded.to_rgba8();
        drop(decoded);

        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(BgRemovalError::decode("Decoded image has zero dimensions"));
        }

        log::debug!("Decoded image: {}x{}", rgba.width(), rgba.height());
        Ok(ImageHandle::new(rgba))
    }

    async fn fetch(&self, source: &ImageSource) -> Result<Fetched> {
        match source {
            ImageSource::Bytes(bytes) => Ok(Fetched {
                bytes: bytes.clone(),
                declared_mime: None,
            }),
            ImageSource::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| BgRemovalError::file_io_error("read image file", path, &e))?;
                Ok(Fetched {
                    bytes,
                    declared_mime: None,
                })
            },
            ImageSource::DataUrl(url) => {
                let (mime, bytes) = parse_data_url(url)?;
                Ok(Fetched {
                    bytes,
                    declared_mime: Some(mime),
                })
            },
            ImageSource::Url(url) => self.fetch_url(url).await,
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Fetched> {
        log::debug!("Fetching image: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let declared_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgRemovalError::network(format!("Failed to read body of {}: {}", url, e)))?
            .to_vec();

        Ok(Fetched {
            bytes,
            declared_mime,
        })
    }
}

/// Split a base64 data URL into its MIME type and payload
///
/// # Errors
/// - Missing `data:` prefix, missing comma, non-base64 encoding or bad payload (`Decode`)
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| BgRemovalError::decode("Data URL must start with 'data:'"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| BgRemovalError::decode("Data URL has no payload separator"))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim();
    let is_base64 = parts.any(|param| param.trim().eq_ignore_ascii_case("base64"));
    if !is_base64 {
        return Err(BgRemovalError::decode(
            "Only base64-encoded data URLs are supported",
        ));
    }

    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| BgRemovalError::decode(format!("Invalid base64 payload: {}", e)))?;

    // RFC 2397: an omitted media type defaults to text/plain
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    Ok((mime.to_string(), bytes))
}

/// Build a base64 data URL for encoded bytes
#[must_use]
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

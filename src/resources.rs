//! Per-run temporary artifacts
//!
//! A processed image is handed to the presentation layer and the editing
//! collaborator as a file reference. The file lives exactly as long as the
//! artifact: dropping it (new run, edit, delete) removes the file.

use crate::encoder::OutputEncoder;
use crate::error::{BgRemovalError, Result};
use crate::types::{EncodedImage, OutputFormat, ProcessedImage};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Encoded processed image backed by a temporary file
#[derive(Debug)]
pub struct TempArtifact {
    file: NamedTempFile,
    encoded: EncodedImage,
}

impl TempArtifact {
    /// Encode `image` as PNG and write it to a fresh temporary file
    ///
    /// # Errors
    /// - Encoding failed (`Encode`)
    /// - Temporary file could not be written (`Io`)
    pub async fn create(image: &ProcessedImage) -> Result<Self> {
        let encoded = OutputEncoder::encode(image, OutputFormat::Png).await?;
        Self::from_encoded(encoded)
    }

    /// Write already encoded bytes to a fresh temporary file
    ///
    /// # Errors
    /// - Temporary file could not be written (`Io`)
    pub fn from_encoded(encoded: EncodedImage) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("bgremove-")
            .suffix(&format!(".{}", encoded.format.extension()))
            .tempfile()?;
        if let Err(e) = file.write_all(&encoded.bytes).and_then(|()| file.flush()) {
            return Err(BgRemovalError::file_io_error("write temp artifact", file.path(), &e));
        }

        log::debug!(
            "Temp artifact {} ({} bytes)",
            file.path().display(),
            encoded.len()
        );
        Ok(Self { file, encoded })
    }

    /// Displayable source reference for the artifact
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub fn encoded(&self) -> &EncodedImage {
        &self.encoded
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.encoded.bytes
    }
}

//! Error types for background removal pipeline operations

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error taxonomy for every pipeline stage
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload rejected because the source is not an image
    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    /// Source bytes are not a supported raster format or are corrupt
    #[error("Decode error: {0}")]
    Decode(String),

    /// Segmentation model returned no result, a malformed result, or a mismatched mask
    #[error("Inference error: {0}")]
    Inference(String),

    /// Encoder refused the buffer
    #[error("Encode error: {0}")]
    Encode(String),

    /// Model could not be constructed (weights unavailable, runtime failure)
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model file resolution or parsing errors
    #[error("Model error: {0}")]
    Model(String),

    /// Network errors while fetching images or model weights
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used at the orchestrator boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidFileType,
    Decode,
    Inference,
    Encode,
    ResourceExhaustion,
    Io,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Whether the user can recover by re-invoking the same operation
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::ResourceExhaustion)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidFileType => "invalid file type",
            Self::Decode => "decode",
            Self::Inference => "inference",
            Self::Encode => "encode",
            Self::ResourceExhaustion => "resource exhaustion",
            Self::Io => "io",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl BgRemovalError {
    /// Create a new invalid file type error
    pub fn invalid_file_type<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFileType(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new resource exhaustion error
    pub fn resource_exhaustion<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhaustion(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Classify this error for the orchestrator boundary
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Network(_) => ErrorKind::Io,
            Self::InvalidFileType(_) => ErrorKind::InvalidFileType,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Encode(_) => ErrorKind::Encode,
            Self::ResourceExhaustion(_) | Self::Model(_) => ErrorKind::ResourceExhaustion,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

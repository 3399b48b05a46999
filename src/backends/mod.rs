//! Inference backends for the segmentation model
//!
//! - ONNX Runtime (`onnx` feature): hardware acceleration through CUDA or CoreML
//! - Tract (`tract` feature): pure Rust, CPU only

pub mod tensor;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxModelFactory;

#[cfg(feature = "tract")]
pub use self::tract::TractModelFactory;

use crate::config::{BackendType, ModelConfig};
use crate::error::{BgRemovalError, Result};
use crate::segmentation::ModelFactory;
use std::sync::Arc;

/// Backends compiled into this build
#[must_use]
pub fn available_backends() -> Vec<BackendType> {
    let mut backends = Vec::new();
    #[cfg(feature = "onnx")]
    backends.push(BackendType::Onnx);
    #[cfg(feature = "tract")]
    backends.push(BackendType::Tract);
    backends
}

/// Factory for the backend selected in `config`
///
/// # Errors
/// - The backend was not compiled in (`InvalidConfig`)
pub fn default_factory(config: &ModelConfig) -> Result<Arc<dyn ModelFactory>> {
    match config.backend {
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Arc::new(OnnxModelFactory)),
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Arc::new(TractModelFactory)),
        #[allow(unreachable_patterns)]
        other => Err(BgRemovalError::invalid_config(format!(
            "Backend '{}' is not available in this build (available: {:?})",
            other,
            available_backends()
        ))),
    }
}

//! User-visible notices emitted by the orchestrator
//!
//! Presentation is not handled here: a sink receives `{title, description,
//! severity}` events and decides how to show them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How a notice should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    /// Rendered as destructive by most front ends
    Error,
}

/// A single notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    #[must_use]
    pub fn new<T: Into<String>, D: Into<String>>(
        title: T,
        description: D,
        severity: Severity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn invalid_file_type() -> Self {
        Self::new("Invalid file type", "Please upload an image file", Severity::Error)
    }

    #[must_use]
    pub fn uploaded() -> Self {
        Self::new("Success", "Image uploaded successfully", Severity::Success)
    }

    /// Upload accepted as an image but its bytes could not be decoded
    #[must_use]
    pub fn decode_failed() -> Self {
        Self::new("Error", "Failed to read image", Severity::Error)
    }

    #[must_use]
    pub fn processed() -> Self {
        Self::new("Success!", "Background removed successfully", Severity::Success)
    }

    #[must_use]
    pub fn processing_failed() -> Self {
        Self::new("Error", "Failed to process image", Severity::Error)
    }

    /// The segmentation model could not be constructed; the session cannot process further
    #[must_use]
    pub fn model_unavailable() -> Self {
        Self::new(
            "Error",
            "Background removal model could not be loaded",
            Severity::Error,
        )
    }

    #[must_use]
    pub fn deleted() -> Self {
        Self::new("Deleted", "Image has been removed", Severity::Info)
    }

    #[must_use]
    pub fn downloaded() -> Self {
        Self::new("Downloaded", "Image has been saved", Severity::Success)
    }

    #[must_use]
    pub fn download_failed() -> Self {
        Self::new("Error", "Failed to save image", Severity::Error)
    }

    #[must_use]
    pub fn edit_applied() -> Self {
        Self::new("Success", "Edit applied", Severity::Success)
    }

    #[must_use]
    pub fn edit_failed() -> Self {
        Self::new("Error", "Failed to apply edit", Severity::Error)
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}

/// Receiver of notices
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sink that writes notices to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Error => {
                tracing::warn!(title = %notice.title, "{}", notice.description);
            },
            Severity::Info | Severity::Success => {
                tracing::info!(title = %notice.title, "{}", notice.description);
            },
        }
    }
}

/// Sink that forwards notices to a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver that observes it
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            log::debug!("Notice receiver dropped; discarding notice");
        }
    }
}

/// Sink that discards every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotifier;

impl NotificationSink for NoOpNotifier {
    fn notify(&self, _notice: Notice) {}
}

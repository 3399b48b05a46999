//! Progress reporting service
//!
//! Progress flows one way: the segmentation invoker (and the model loader it
//! drives) push fractional updates into a channel, and the orchestrator folds
//! them into the 0-100 value carried by `PipelineState::Processing`.

use instant::Instant;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Stages reported while a processing run is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Constructing or fetching the segmentation model
    ModelLoading,
    /// Downloading model weights
    ModelDownload,
    /// Re-encoding the normalized buffer for the model
    TransportEncoding,
    /// Running model inference
    Inference,
    /// Checking the returned mask
    MaskValidation,
    /// Run finished
    Completed,
}

impl ProcessingStage {
    /// Human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ModelLoading => "Loading segmentation model",
            Self::ModelDownload => "Downloading model weights",
            Self::TransportEncoding => "Preparing image for inference",
            Self::Inference => "Running AI inference",
            Self::MaskValidation => "Validating segmentation mask",
            Self::Completed => "Processing completed",
        }
    }
}

/// A single progress report
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Stage that produced the update
    pub stage: ProcessingStage,
    /// Overall fraction in `[0.0, 1.0]`
    pub fraction: f32,
    /// Milliseconds since the sender was created
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Fraction mapped onto the 0-100 UI scale (scaled, rounded, clamped)
    #[must_use]
    pub fn percent(&self) -> u8 {
        fraction_to_percent(self.fraction)
    }
}

/// Convert a `[0, 1]` fraction to a rounded 0-100 percentage
///
/// Out-of-range and NaN inputs are clamped (NaN maps to 0).
#[must_use]
pub fn fraction_to_percent(fraction: f32) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Receiving half of a progress channel
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressUpdate>;

/// Create a connected sender/receiver pair
#[must_use]
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender::new(Some(tx)), rx)
}

/// Sending half of a progress channel
///
/// Reports are clamped to `[0, 1]` and only strictly increasing values are
/// forwarded. Scoped senders created with [`ProgressSender::scoped`] map their
/// local `[0, 1]` range onto a sub-range of the parent and share its
/// high-water mark, so the combined stream stays monotonic.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    start: f32,
    end: f32,
    last: Arc<Mutex<f32>>,
    started_at: Instant,
}

impl ProgressSender {
    fn new(tx: Option<mpsc::UnboundedSender<ProgressUpdate>>) -> Self {
        Self {
            tx,
            start: 0.0,
            end: 1.0,
            last: Arc::new(Mutex::new(f32::NEG_INFINITY)),
            started_at: Instant::now(),
        }
    }

    /// Sender that drops every report
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Sender whose local `[0, 1]` covers `[start, end]` of this sender's range
    #[must_use]
    pub fn scoped(&self, start: f32, end: f32) -> Self {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        let span = self.end - self.start;
        Self {
            tx: self.tx.clone(),
            start: self.start + start * span,
            end: self.start + end * span,
            last: Arc::clone(&self.last),
            started_at: self.started_at,
        }
    }

    /// Report a local fraction for `stage`
    ///
    /// Returns whether the update was forwarded.
    pub fn report(&self, stage: ProcessingStage, fraction: f32) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if fraction.is_nan() {
            return false;
        }

        let local = fraction.clamp(0.0, 1.0);
        let overall = self.start + local * (self.end - self.start);

        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if overall <= *last {
                return false;
            }
            *last = overall;
        }

        let update = ProgressUpdate {
            stage,
            fraction: overall,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
        };
        tracing::trace!(
            stage = stage.description(),
            percent = update.percent(),
            "progress"
        );
        // A closed receiver means nobody is watching; the run continues.
        tx.send(update).is_ok()
    }

    /// Report the end of this sender's range
    pub fn complete(&self, stage: ProcessingStage) -> bool {
        self.report(stage, 1.0)
    }

    /// Whether reports go anywhere
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

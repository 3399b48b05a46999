//! Pipeline orchestrator
//!
//! A single authoritative state machine sequences upload, processing, editing
//! and download for one session:
//!
//! ```text
//! Empty --upload--> Loaded --process--> Processing --ok--> Processed <--back-- Editing
//!                     ^                     |                   |--edit-->
//!                     +------- failure -----+
//! any --delete--> Empty
//! ```
//!
//! Every stage failure is caught here and turned into a state transition
//! plus a notice; callers only ever see an [`Outcome`].

use crate::compositor::AlphaCompositor;
use crate::config::PipelineConfig;
use crate::editor::ImageEditor;
use crate::error::{BgRemovalError, ErrorKind, Result};
use crate::loader::{ImageLoader, UploadedFile};
use crate::normalizer::Normalizer;
use crate::resources::TempArtifact;
use crate::segmentation::{ModelFactory, SegmentationInvoker};
use crate::services::notification::{LogNotifier, Notice, NotificationSink};
use crate::services::progress::progress_channel;
use crate::types::{EncodedImage, ImageHandle, ProcessedImage, ProcessingTimings};
use instant::Instant;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// The single source of truth for which affordances are enabled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Empty,
    Loaded,
    Processing { progress: u8 },
    Processed,
    Editing,
    /// The model could not be loaded; only `delete` is accepted
    Failed { reason: String },
}

impl PipelineState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loaded => "loaded",
            Self::Processing { .. } => "processing",
            Self::Processed => "processed",
            Self::Editing => "editing",
            Self::Failed { .. } => "failed",
        }
    }

    /// UI phase for this state
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Empty => Phase::Empty,
            Self::Loaded | Self::Failed { .. } => Phase::Unprocessed,
            Self::Processing { .. } => Phase::Processing,
            Self::Processed | Self::Editing => Phase::Processed,
        }
    }

    /// Operations the presentation layer may offer in this state
    #[must_use]
    pub fn affordances(&self) -> Affordances {
        Affordances {
            upload: matches!(self, Self::Empty),
            process: matches!(self, Self::Loaded),
            edit: matches!(self, Self::Processed),
            back: matches!(self, Self::Editing),
            apply_edit: matches!(self, Self::Editing),
            download: matches!(self, Self::Processed | Self::Editing),
            delete: !matches!(self, Self::Empty),
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing { progress } => write!(f, "processing ({}%)", progress),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// The four presentation phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Unprocessed,
    Processing,
    Processed,
}

/// Enabled operations
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Affordances {
    pub upload: bool,
    pub process: bool,
    pub edit: bool,
    pub back: bool,
    pub apply_edit: bool,
    pub download: bool,
    pub delete: bool,
}

/// Result of an orchestrator operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran and its effect is visible
    Applied,
    /// Not allowed in the current state; nothing changed
    Rejected { reason: String },
    /// A stage failed; the state machine moved to its recovery state
    Failed { kind: ErrorKind },
    /// The session was deleted while the operation ran; its result was dropped
    Discarded,
}

impl Outcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    fn rejected(state: &PipelineState, operation: &str) -> Self {
        Self::Rejected {
            reason: format!("cannot {} while {}", operation, state),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    state: PipelineState,
    /// Bumped by every delete; runs started under an older generation are discarded
    generation: u64,
    /// Set while a run executes, including one already discarded by `delete`
    run_in_flight: bool,
    original: Option<ImageHandle>,
    processed: Option<ProcessedImage>,
    artifact: Option<TempArtifact>,
    timings: Option<ProcessingTimings>,
}

struct Inner {
    session: Mutex<Session>,
    state_tx: watch::Sender<PipelineState>,
    config: PipelineConfig,
    loader: ImageLoader,
    normalizer: Normalizer,
    invoker: Arc<SegmentationInvoker>,
    notifier: Arc<dyn NotificationSink>,
}

/// Session state machine driving the pipeline stages
///
/// Cloning is cheap; clones share the session.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("state", &self.state())
            .field("invoker", &self.inner.invoker)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Create a session
    ///
    /// # Errors
    /// - Invalid configuration (`InvalidConfig`)
    /// - HTTP client construction failed (`Network`)
    pub fn new(
        config: PipelineConfig,
        invoker: Arc<SegmentationInvoker>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(PipelineState::Empty);
        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::default()),
                state_tx,
                loader: ImageLoader::new()?,
                normalizer: Normalizer::new(config.max_dimension),
                invoker,
                notifier,
                config,
            }),
        })
    }

    /// Session with its own invoker and notices written to the log
    ///
    /// # Errors
    /// See [`PipelineOrchestrator::new`].
    pub fn with_factory(config: PipelineConfig, factory: Arc<dyn ModelFactory>) -> Result<Self> {
        let invoker = Arc::new(SegmentationInvoker::from_config(factory, &config));
        Self::new(config, invoker, Arc::new(LogNotifier))
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notice: Notice) {
        self.inner.notifier.notify(notice);
    }

    /// Set the state and publish it to subscribers
    fn transition(&self, session: &mut Session, next: PipelineState) {
        if session.state != next {
            debug!(from = %session.state, to = %next, "state transition");
        }
        session.state = next.clone();
        self.inner.state_tx.send_replace(next);
    }

    /// `Empty -> Loaded`
    ///
    /// Non-image uploads leave the session `Empty` with an
    /// "Invalid file type" notice.
    pub async fn upload(&self, file: UploadedFile) -> Outcome {
        let generation = {
            let session = self.session();
            if session.state != PipelineState::Empty {
                return Outcome::rejected(&session.state, "upload");
            }
            session.generation
        };

        let span = info_span!("upload", file = file.name.as_deref().unwrap_or("<unnamed>"));
        let loaded = self.inner.loader.load_upload(&file).instrument(span).await;

        let handle = match loaded {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Upload failed: {}", e);
                let kind = e.kind();
                match kind {
                    ErrorKind::InvalidFileType => self.notify(Notice::invalid_file_type()),
                    _ => self.notify(Notice::decode_failed()),
                }
                return Outcome::Failed { kind };
            },
        };

        let mut session = self.session();
        if session.generation != generation || session.state != PipelineState::Empty {
            debug!("Upload superseded; dropping decoded image");
            return Outcome::Discarded;
        }
        info!(width = handle.width(), height = handle.height(), "image loaded");
        session.original = Some(handle);
        self.transition(&mut session, PipelineState::Loaded);
        drop(session);

        self.notify(Notice::uploaded());
        Outcome::Applied
    }

    /// Drag-and-drop: only the first file is used
    pub async fn upload_dropped(&self, files: Vec<UploadedFile>) -> Outcome {
        match files.into_iter().next() {
            Some(file) => self.upload(file).await,
            None => Outcome::Rejected {
                reason: "no files were dropped".to_string(),
            },
        }
    }

    /// `Loaded -> Processing -> Processed`, or back to `Loaded` on failure
    ///
    /// A second call while a run is in flight is rejected without touching
    /// the running one. This includes a run discarded by `delete` that has
    /// not finished yet.
    pub async fn process(&self) -> Outcome {
        let (generation, original) = {
            let mut session = self.session();
            let original = match (&session.state, &session.original) {
                (PipelineState::Loaded, Some(original)) => original.clone(),
                (state, _) => return Outcome::rejected(state, "process"),
            };
            if session.run_in_flight {
                return Outcome::Rejected {
                    reason: "cannot process while a discarded run is still finishing".to_string(),
                };
            }
            session.run_in_flight = true;
            self.transition(&mut session, PipelineState::Processing { progress: 0 });
            (session.generation, original)
        };
        let _in_flight = InFlightRun(self);

        let span = info_span!("process", generation);
        match self.run(generation, original).instrument(span).await {
            Ok((processed, artifact, timings)) => {
                let mut session = self.session();
                if session.generation != generation {
                    debug!("Session deleted during processing; discarding result");
                    return Outcome::Discarded;
                }
                info!("{}", timings.summary());
                session.processed = Some(processed);
                session.artifact = Some(artifact);
                session.timings = Some(timings);
                self.transition(&mut session, PipelineState::Processed);
                drop(session);

                self.notify(Notice::processed());
                Outcome::Applied
            },
            Err(e) => {
                let kind = e.kind();
                let mut session = self.session();
                if session.generation != generation {
                    debug!("Session deleted during failed run: {}", e);
                    return Outcome::Discarded;
                }
                warn!("Processing failed: {}", e);
                if kind == ErrorKind::ResourceExhaustion {
                    self.transition(
                        &mut session,
                        PipelineState::Failed {
                            reason: e.to_string(),
                        },
                    );
                    drop(session);
                    self.notify(Notice::model_unavailable());
                } else {
                    self.transition(&mut session, PipelineState::Loaded);
                    drop(session);
                    self.notify(Notice::processing_failed());
                }
                Outcome::Failed { kind }
            },
        }
    }

    async fn run(
        &self,
        generation: u64,
        original: ImageHandle,
    ) -> Result<(ProcessedImage, TempArtifact, ProcessingTimings)> {
        let started = Instant::now();
        let mut timings = ProcessingTimings::default();

        let stage = Instant::now();
        let normalizer = self.inner.normalizer;
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(original))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Normalize task failed: {}", e)))?;
        timings.normalize_ms = stage.elapsed().as_millis() as u64;
        debug!(
            width = normalized.buffer.width(),
            height = normalized.buffer.height(),
            resized = normalized.was_resized,
            "normalized"
        );

        let stage = Instant::now();
        let (progress_tx, mut progress_rx) = progress_channel();
        let mask = {
            let segment = self.inner.invoker.segment(&normalized.buffer, &progress_tx);
            tokio::pin!(segment);
            loop {
                tokio::select! {
                    result = &mut segment => break result?,
                    Some(update) = progress_rx.recv() => {
                        self.apply_progress(generation, update.percent());
                    },
                }
            }
        };
        while let Ok(update) = progress_rx.try_recv() {
            self.apply_progress(generation, update.percent());
        }
        timings.segmentation_ms = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let buffer = normalized.buffer;
        let processed =
            tokio::task::spawn_blocking(move || AlphaCompositor::composite(buffer, mask))
                .await
                .map_err(|e| BgRemovalError::internal(format!("Composite task failed: {}", e)))??;
        timings.composite_ms = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let artifact = TempArtifact::create(&processed).await?;
        timings.encode_ms = stage.elapsed().as_millis() as u64;

        timings.total_ms = started.elapsed().as_millis() as u64;
        Ok((processed, artifact, timings))
    }

    fn apply_progress(&self, generation: u64, percent: u8) {
        let mut session = self.session();
        if session.generation != generation {
            return;
        }
        if let PipelineState::Processing { progress } = session.state {
            if percent > progress {
                self.transition(&mut session, PipelineState::Processing { progress: percent });
            }
        }
    }

    /// `Processed -> Editing`
    pub fn edit(&self) -> Outcome {
        let mut session = self.session();
        if session.state != PipelineState::Processed {
            return Outcome::rejected(&session.state, "edit");
        }
        self.transition(&mut session, PipelineState::Editing);
        Outcome::Applied
    }

    /// `Editing -> Processed`
    pub fn back(&self) -> Outcome {
        let mut session = self.session();
        if session.state != PipelineState::Editing {
            return Outcome::rejected(&session.state, "go back");
        }
        self.transition(&mut session, PipelineState::Processed);
        Outcome::Applied
    }

    /// Replace the processed image with an editor's output (state stays `Editing`)
    ///
    /// Results whose dimensions differ from the current image are rejected.
    pub async fn apply_edit(&self, editor: &dyn ImageEditor) -> Outcome {
        let (generation, current) = {
            let session = self.session();
            match (&session.state, &session.processed) {
                (PipelineState::Editing, Some(processed)) => {
                    (session.generation, processed.clone())
                },
                (state, _) => return Outcome::rejected(state, "apply an edit"),
            }
        };

        let edited = run_editor(editor, &current)
            .instrument(info_span!("apply_edit", editor = editor.name()))
            .await;

        let (edited, artifact) = match edited {
            Ok(result) => result,
            Err(e) => {
                warn!("Edit failed: {}", e);
                self.notify(Notice::edit_failed());
                return Outcome::Failed { kind: e.kind() };
            },
        };

        let mut session = self.session();
        if session.generation != generation || session.state != PipelineState::Editing {
            return Outcome::Discarded;
        }
        session.processed = Some(edited);
        // Replacing the artifact removes the previous temporary file
        session.artifact = Some(artifact);
        drop(session);

        self.notify(Notice::edit_applied());
        Outcome::Applied
    }

    /// Write the processed image into `dir` under the configured file name
    ///
    /// Not a transition; the state is unchanged.
    pub async fn download(&self, dir: &Path) -> Outcome {
        let Some(encoded) = self.export_png() else {
            let session = self.session();
            return Outcome::rejected(&session.state, "download");
        };

        let target = dir.join(&self.inner.config.download_file_name);
        match tokio::fs::write(&target, &encoded.bytes).await {
            Ok(()) => {
                info!(path = %target.display(), bytes = encoded.len(), "downloaded");
                self.notify(Notice::downloaded());
                Outcome::Applied
            },
            Err(e) => {
                let e = BgRemovalError::file_io_error("write download", &target, &e);
                warn!("{}", e);
                self.notify(Notice::download_failed());
                Outcome::Failed { kind: e.kind() }
            },
        }
    }

    /// Encoded PNG of the current processed image (`Processed` or `Editing` only)
    #[must_use]
    pub fn export_png(&self) -> Option<EncodedImage> {
        let session = self.session();
        if !matches!(session.state, PipelineState::Processed | PipelineState::Editing) {
            return None;
        }
        session.artifact.as_ref().map(|artifact| artifact.encoded().clone())
    }

    /// Any state -> `Empty`, dropping every held image and artifact
    ///
    /// A run in flight completes and its result is discarded.
    pub fn delete(&self) -> Outcome {
        let mut session = self.session();
        let had_image = session.state != PipelineState::Empty;
        session.generation += 1;
        session.original = None;
        session.processed = None;
        session.artifact = None;
        session.timings = None;
        self.transition(&mut session, PipelineState::Empty);
        drop(session);

        if had_image {
            self.notify(Notice::deleted());
        }
        Outcome::Applied
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.session().state.clone()
    }

    /// 0-100; 100 once processed, 0 outside a run
    #[must_use]
    pub fn progress(&self) -> u8 {
        match self.session().state {
            PipelineState::Processing { progress } => progress,
            PipelineState::Processed | PipelineState::Editing => 100,
            _ => 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.session().state.phase()
    }

    #[must_use]
    pub fn affordances(&self) -> Affordances {
        let session = self.session();
        let mut affordances = session.state.affordances();
        affordances.process &= !session.run_in_flight;
        affordances
    }

    /// The uploaded image (at upload resolution)
    #[must_use]
    pub fn original(&self) -> Option<ImageHandle> {
        self.session().original.clone()
    }

    #[must_use]
    pub fn processed(&self) -> Option<ProcessedImage> {
        self.session().processed.clone()
    }

    /// File reference for displaying the processed image
    #[must_use]
    pub fn processed_source(&self) -> Option<PathBuf> {
        self.session()
            .artifact
            .as_ref()
            .map(|artifact| artifact.path().to_path_buf())
    }

    /// Timings of the last successful run
    #[must_use]
    pub fn last_timings(&self) -> Option<ProcessingTimings> {
        self.session().timings.clone()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_model_loaded(&self) -> bool {
        self.inner.invoker.is_model_loaded()
    }

    /// Watch state changes, including progress updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.inner.state_tx.subscribe()
    }
}

/// Clears `run_in_flight` when a run ends, however it ends
struct InFlightRun<'a>(&'a PipelineOrchestrator);

impl Drop for InFlightRun<'_> {
    fn drop(&mut self) {
        self.0.session().run_in_flight = false;
    }
}

async fn run_editor(
    editor: &dyn ImageEditor,
    current: &ProcessedImage,
) -> Result<(ProcessedImage, TempArtifact)> {
    let edited = editor.edit(current)?;
    if edited.dimensions() != current.dimensions() {
        return Err(BgRemovalError::internal(format!(
            "Editor '{}' changed dimensions from {:?} to {:?}",
            editor.name(),
            current.dimensions(),
            edited.dimensions()
        )));
    }
    let artifact = TempArtifact::create(&edited).await?;
    Ok((edited, artifact))
}

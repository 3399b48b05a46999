//! Subscriber setup for the command-line front end
//!
//! The library only emits events; binaries decide where they go.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored, compact console output (default)
    Console,
    /// Uncolored compact output for CI logs
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    Console,
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it at exit to flush
#[derive(Debug, Default)]
#[must_use]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Filter directives; overrides `verbosity` when set
    pub env_filter: Option<String>,
    /// Correlation id logged at startup
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directives for the configured verbosity
    ///
    /// Inference runtimes stay at `warn` unless tracing everything.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,ort=warn,tract_onnx=warn",
            1 => "debug,ort=warn,tract_onnx=warn,hyper=info,reqwest=info",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(true).with_target(false).compact())
                    .try_init()?;
            },
            (TracingFormat::Compact, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().with_ansi(false).with_target(false).compact())
                    .try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                registry
                    .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                    .try_init()?;
            },
            #[cfg(feature = "tracing-files")]
            (_, TracingOutput::File(path)) => {
                let (writer, file_guard) = file_writer(path);
                guard._file = Some(file_guard);
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer).compact())
                    .try_init()?;
            },
            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                let (writer, file_guard) = file_writer(path);
                guard._file = Some(file_guard);
                let console = fmt::layer()
                    .with_ansi(*format == TracingFormat::Console)
                    .with_target(false)
                    .compact();
                registry
                    .with(console)
                    .with(fmt::layer().with_ansi(false).with_writer(writer).compact())
                    .try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "background removal session started");
        }

        Ok(guard)
    }
}

#[cfg(feature = "tracing-files")]
fn file_writer(
    path: &std::path::Path,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("bgremove.log"));
    tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name))
}

/// Console tracing tagged with a fresh session id
///
/// # Errors
/// See [`TracingConfig::init`].
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span helpers for the command-line session
pub mod spans {
    use tracing::{Level, Span};

    pub fn session(session_id: &str, model: &str, backend: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            model = %model,
            backend = %backend
        )
    }

    pub fn input(source: &str) -> Span {
        tracing::span!(Level::INFO, "input", source = %source)
    }
}

//! Cross-cutting services used by the pipeline

pub mod notification;
pub mod progress;

pub use notification::{
    ChannelNotifier, LogNotifier, NoOpNotifier, Notice, NotificationSink, Severity,
};
pub use progress::{
    fraction_to_percent, progress_channel, ProcessingStage, ProgressReceiver, ProgressSender,
    ProgressUpdate,
};

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSeverity {
    Info,
    Warning,
    Error,
}

/// Narrow presentation-layer seam.
///
/// The recorder owns a sink injected at construction and never reaches into
/// ambient UI state; callbacks may arrive from background tasks, so
/// implementations must be thread-safe.
pub trait StatusSink: Send + Sync {
    /// Display a status line with the given severity
    fn status_changed(&self, text: &str, severity: StatusSeverity);

    /// The transcript grew (or was reset) to `count` segments
    fn segment_count_changed(&self, count: usize);
}

/// Sink that forwards status updates to the tracing log, for headless runs
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn status_changed(&self, text: &str, severity: StatusSeverity) {
        match severity {
            StatusSeverity::Info => info!("{text}"),
            StatusSeverity::Warning => warn!("{text}"),
            StatusSeverity::Error => error!("{text}"),
        }
    }

    fn segment_count_changed(&self, count: usize) {
        info!("Recording... ({count} segments)");
    }
}

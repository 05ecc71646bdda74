//! Line errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("Line not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration for {line}: {reason}")]
    Config { line: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {line}: {source}")]
    LineIo {
        line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Line already halted: {0}")]
    AlreadyHalted(String),

    #[error("Line already open: {0}")]
    AlreadyOpen(String),

    #[error("A wait is already in progress on {0}")]
    WaitInProgress(String),

    #[error("Line is closed: {0}")]
    Closed(String),

    #[error("Failed to open {failed} after opening {opened} line(s): {source}")]
    PartialFailure {
        failed: String,
        opened: usize,
        #[source]
        source: Box<LineError>,
    },
}

impl LineError {
    pub(crate) fn config(line: &str, reason: impl Into<String>) -> Self {
        LineError::Config {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(line: &str, source: std::io::Error) -> Self {
        LineError::LineIo {
            line: line.to_string(),
            source,
        }
    }

    /// Whether this is a state conflict the caller may ignore
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            LineError::AlreadyHalted(_) | LineError::AlreadyOpen(_)
        )
    }
}

//! Error taxonomy shared by every pipeline component.
//!
//! Each failure carries a specific [`ErrorKind`] plus a short diagnostic
//! string suitable for direct display. Errors chain like this:
//! Process → Component → Outcome

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::ProcessError;

/// Maximum length of a user-facing diagnostic string.
const DIAGNOSTIC_MAX_CHARS: usize = 512;

/// Stable classification of a failure, exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Encoder or prober binary is absent or not invokable.
    ExecutableNotFound,
    /// Input is missing, empty, or could not be understood by the prober.
    UnreadableMedia,
    /// External process exceeded its time limit.
    Timeout,
    /// Operation was cancelled by the caller.
    Cancelled,
    /// External process exited with a failure status.
    NonZeroExit,
    /// Decode stopped before a usable amount of data was produced.
    Truncated,
    /// Destination path is claimed by another job or already exists.
    DestinationConflict,
    /// Output is missing, empty, or does not match the request.
    PartialWriteDetected,
    /// Codec configuration is not valid for the chosen format.
    InvalidConfig,
    /// Local file-system failure.
    Io,
}

impl ErrorKind {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ExecutableNotFound => "executable not found",
            ErrorKind::UnreadableMedia => "unreadable media",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NonZeroExit => "tool failed",
            ErrorKind::Truncated => "truncated",
            ErrorKind::DestinationConflict => "destination conflict",
            ErrorKind::PartialWriteDetected => "partial write",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::Io => "i/o error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned by pipeline components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{tool} not found (searched: {searched})")]
    ExecutableNotFound { tool: String, searched: String },

    #[error("Cannot read media {}: {reason}", path.display())]
    UnreadableMedia { path: PathBuf, reason: String },

    #[error("{tool} timed out after {}s", after.as_secs_f64())]
    Timeout { tool: String, after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{tool} failed with exit code {exit_code}: {stderr}")]
    NonZeroExit {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Decoding {} ended early: {reason}", path.display())]
    Truncated { path: PathBuf, reason: String },

    #[error("Destination {} is unavailable: {reason}", path.display())]
    DestinationConflict { path: PathBuf, reason: String },

    #[error("Output {} is incomplete: {reason}", path.display())]
    PartialWriteDetected { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl CoreError {
    /// Create an unreadable media error.
    pub fn unreadable(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::UnreadableMedia {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a truncated decode error.
    pub fn truncated(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Truncated {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a destination conflict error.
    pub fn conflict(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::DestinationConflict {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a partial write error.
    pub fn partial_write(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::PartialWriteDetected {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an I/O error with context.
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ExecutableNotFound { .. } => ErrorKind::ExecutableNotFound,
            CoreError::UnreadableMedia { .. } => ErrorKind::UnreadableMedia,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            CoreError::Truncated { .. } => ErrorKind::Truncated,
            CoreError::DestinationConflict { .. } => ErrorKind::DestinationConflict,
            CoreError::PartialWriteDetected { .. } => ErrorKind::PartialWriteDetected,
            CoreError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            CoreError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Short diagnostic text for display.
    ///
    /// Tool failures report the tail of their stderr; everything else
    /// reports the error message.
    pub fn diagnostic(&self) -> String {
        let text = match self {
            CoreError::NonZeroExit { stderr, .. } if !stderr.trim().is_empty() => stderr.clone(),
            other => other.to_string(),
        };
        clip_diagnostic(&text)
    }
}

impl From<ProcessError> for CoreError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::ExecutableNotFound { program, searched } => {
                CoreError::ExecutableNotFound {
                    tool: program,
                    searched,
                }
            }
            ProcessError::NonZeroExit {
                program,
                exit_code,
                stderr,
            } => CoreError::NonZeroExit {
                tool: program,
                exit_code,
                stderr,
            },
            ProcessError::Timeout { program, after } => CoreError::Timeout {
                tool: program,
                after,
            },
            ProcessError::Cancelled { .. } => CoreError::Cancelled,
            ProcessError::Io {
                program,
                operation,
                source,
            } => CoreError::Io {
                operation: format!("{} ({})", operation, program),
                source,
            },
        }
    }
}

/// Trim a diagnostic to at most [`DIAGNOSTIC_MAX_CHARS`], keeping the end.
fn clip_diagnostic(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= DIAGNOSTIC_MAX_CHARS {
        return trimmed.to_string();
    }
    let skip = count - DIAGNOSTIC_MAX_CHARS;
    let tail: String = trimmed.chars().skip(skip).collect();
    format!("...{}", tail)
}

/// Result type for pipeline operations.
pub type CoreResult<T> = Result<T, CoreError>;

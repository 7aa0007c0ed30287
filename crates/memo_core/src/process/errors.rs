//! Error types for process execution.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of a supervised external process.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Binary is absent or not invokable.
    #[error("{program} not found (searched: {searched})")]
    ExecutableNotFound { program: String, searched: String },

    /// Process ran and exited with a failure status.
    #[error("{program} failed with exit code {exit_code}: {stderr}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// Process exceeded its deadline and was terminated.
    #[error("{program} timed out after {}s", after.as_secs_f64())]
    Timeout { program: String, after: Duration },

    /// Process was terminated because the caller cancelled.
    #[error("{program} was cancelled")]
    Cancelled { program: String },

    /// Pipe or wait failure.
    #[error("I/O error in {operation} for {program}: {source}")]
    Io {
        program: String,
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Create an I/O error with context.
    pub fn io(program: impl Into<String>, operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            program: program.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Check if this error means the tool could not be started at all.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::ExecutableNotFound { .. })
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

//! Conversion job structures (request, progress, outcome).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::codec::CodecConfig;
use super::media::MediaTarget;
use crate::error::{CoreError, ErrorKind};

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Fail with a destination conflict.
    #[default]
    Never,
    /// Replace the existing file once the new one is complete.
    Replace,
}

/// One source file to one destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Input file; a probed target skips the duration probe.
    pub source: MediaTarget,
    pub destination: MediaTarget,
    pub config: CodecConfig,
    #[serde(default)]
    pub overwrite: OverwritePolicy,
}

impl ConversionJob {
    /// Build a job whose destination is described by `config`.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, config: CodecConfig) -> Self {
        let destination = MediaTarget::from_config(destination, &config);
        Self {
            source: MediaTarget::unprobed(source),
            destination,
            config,
            overwrite: OverwritePolicy::Never,
        }
    }

    /// Set the overwrite policy.
    pub fn with_overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    /// Use already-probed source metadata.
    pub fn with_source(mut self, source: MediaTarget) -> Self {
        self.source = source;
        self
    }
}

/// Result of a conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversionOutcome {
    Success {
        final_path: PathBuf,
        duration: Option<Duration>,
        size_bytes: u64,
    },
    Failed {
        kind: ErrorKind,
        diagnostic: String,
    },
    Cancelled,
}

impl ConversionOutcome {
    /// Outcome for an error, with cancellation reported as its own variant.
    pub fn from_error(err: &CoreError) -> Self {
        match err.kind() {
            ErrorKind::Cancelled => ConversionOutcome::Cancelled,
            kind => ConversionOutcome::Failed {
                kind,
                diagnostic: err.diagnostic(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success { .. })
    }

    /// Final path if the job succeeded.
    pub fn final_path(&self) -> Option<&PathBuf> {
        match self {
            ConversionOutcome::Success { final_path, .. } => Some(final_path),
            _ => None,
        }
    }

    /// Error kind if the job failed or was cancelled.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ConversionOutcome::Success { .. } => None,
            ConversionOutcome::Failed { kind, .. } => Some(*kind),
            ConversionOutcome::Cancelled => Some(ErrorKind::Cancelled),
        }
    }
}

/// Progress event emitted while encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionProgress {
    /// Fraction of the source encoded, in [0.0, 1.0].
    pub fraction_complete: f64,
    /// Wall-clock time since the encoder started.
    pub elapsed: Duration,
}

/// Observer for conversion progress; called from the converting thread.
pub type ProgressCallback = Box<dyn Fn(ConversionProgress) + Send + Sync>;

/// Expected output size and encoding time for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEstimate {
    pub size_bytes: u64,
    pub duration: Duration,
}

//! Data models for the finalization pipeline.
//!
//! This module contains the core data structures used throughout the crate:
//! - Archival formats and codec configuration
//! - Media descriptions (probed and requested files)
//! - Conversion jobs, progress and outcomes
//! - Waveform and live level data

mod codec;
mod jobs;
mod media;
mod signal;

// Re-export all public types
pub use codec::{AudioFormat, CodecConfig, FormatSpec};
pub use jobs::{
    ConversionEstimate, ConversionJob, ConversionOutcome, ConversionProgress, OverwritePolicy,
    ProgressCallback,
};
pub use media::{MediaTarget, PcmLayout, Quality, SampleFormat};
pub use signal::{LevelSample, WaveformData};

//! Waveform extraction for display.
//!
//! This module provides:
//! - [`WaveformExtractor`], decoding through ffmpeg and reducing to peak bins
//! - [`WaveformCache`], reusing results until the source file changes
//! - [`WaveformSource`], which file of a finalized recording to decode
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use memo_core::process::ProcessRunner;
//! use memo_core::waveform::WaveformExtractor;
//!
//! let extractor = WaveformExtractor::new(ProcessRunner::default());
//! let data = extractor.extract(Path::new("memo.opus"), 1000)?;
//! println!("{} bins over {:?}", data.len(), data.duration);
//! # Ok::<(), memo_core::CoreError>(())
//! ```

mod cache;
mod extractor;
mod reduce;

use serde::{Deserialize, Serialize};

pub use cache::WaveformCache;
pub use extractor::WaveformExtractor;
pub use reduce::{bin_count_for, PeakAccumulator, PeakPyramid, Peaks, WindowPeaks};

/// Which file the waveform is decoded from.
///
/// The raw capture is exact; the archive shows what will actually be kept,
/// including any resampling or lossy coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformSource {
    #[default]
    Capture,
    Archive,
}

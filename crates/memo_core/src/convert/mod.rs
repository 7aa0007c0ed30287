//! Archival conversion of raw captures.
//!
//! - [`FormatConverter`] runs one job (or a batch) through ffmpeg
//! - [`DestinationClaims`] keeps two jobs off the same destination
//! - Progress is parsed from the encoder's stderr as it streams
//!
//! # Example
//!
//! ```no_run
//! use memo_core::convert::FormatConverter;
//! use memo_core::models::{AudioFormat, CodecConfig, ConversionJob};
//! use memo_core::process::{CancelToken, ProcessRunner};
//!
//! let converter = FormatConverter::new(ProcessRunner::default());
//! let config = CodecConfig::lossy(AudioFormat::Opus, 48000, 64000, 1);
//! let job = ConversionJob::new("capture.wav", "memo.opus", config);
//!
//! let outcome = converter.convert(&job, &CancelToken::new(), None);
//! println!("{:?}", outcome);
//! ```

mod args;
mod claims;
mod converter;
mod progress;

pub use args::encoder_args;
pub use claims::{DestinationClaim, DestinationClaims};
pub use converter::{archive_path, FormatConverter};
pub use progress::{parse_progress_time, ProgressTracker};

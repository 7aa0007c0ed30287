//! memo_core - Recording finalization backend
//!
//! This crate turns a raw capture into an archival file through ffmpeg,
//! derives a display waveform and meters the capture while it is still
//! being recorded. It has no UI dependencies; the application drives it
//! through [`pipeline::Finalizer`] and [`monitor::LevelMonitor`].

pub mod config;
pub mod convert;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod process;
pub mod temp;
pub mod waveform;

#[cfg(all(test, unix))]
mod testutil;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use pipeline::{CaptureSession, FinalizeReport, FinalizeRequest, Finalizer};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Supervised execution of external tools (ffmpeg, ffprobe).
//!
//! This module provides:
//! - Tool resolution on a configurable search path
//! - [`ProcessRunner`] for one-shot and streaming invocations
//! - [`ProcessHandle`], an RAII owner of the child process and its pipes
//! - Cooperative cancellation through [`CancelToken`]
//! - Graceful termination (SIGTERM, bounded grace, then kill)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use memo_core::process::{CancelToken, CommandSpec, ProcessRunner, ToolPaths};
//!
//! let runner = ProcessRunner::new(ToolPaths::default());
//! let spec = CommandSpec::new("ffmpeg")
//!     .arg("-version")
//!     .timeout(Duration::from_secs(5));
//!
//! let output = runner.run(spec, &CancelToken::new()).unwrap();
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! ```

mod cancel;
mod errors;
mod handle;
mod locate;
mod output;
mod runner;

pub use cancel::CancelToken;
pub use errors::{ProcessError, ProcessResult};
pub use handle::{ProcessHandle, ProcessStatus};
pub use locate::{Tool, ToolPaths};
pub use output::{LineSplitter, OutputTail};
pub use runner::{CommandSpec, LineSink, ProcessOutput, ProcessRunner, StdoutMode};

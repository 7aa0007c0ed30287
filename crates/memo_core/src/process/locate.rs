//! Locating external executables.
//!
//! Tools are looked up in the configured search directories first, then
//! on `PATH`. A program given with a directory component is used as-is.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{ProcessError, ProcessResult};

/// External tools used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    /// Encoder/decoder.
    Ffmpeg,
    /// Metadata prober.
    Ffprobe,
}

impl Tool {
    /// Default executable name.
    pub fn default_name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }
}

/// Configured locations of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Encoder program (name or path).
    pub ffmpeg: PathBuf,
    /// Prober program (name or path).
    pub ffprobe: PathBuf,
    /// Directories searched before `PATH`.
    pub search_dirs: Vec<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from(Tool::Ffmpeg.default_name()),
            ffprobe: PathBuf::from(Tool::Ffprobe.default_name()),
            search_dirs: Vec::new(),
        }
    }
}

impl ToolPaths {
    /// Override the encoder program.
    pub fn with_ffmpeg(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    /// Override the prober program.
    pub fn with_ffprobe(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffprobe = program.into();
        self
    }

    /// Add a directory to search before `PATH`.
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    /// Configured program for a tool.
    pub fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::Ffprobe => &self.ffprobe,
        }
    }

    /// Resolve a program to an executable path.
    pub fn resolve(&self, program: &Path) -> ProcessResult<PathBuf> {
        let not_found = || ProcessError::ExecutableNotFound {
            program: program.display().to_string(),
            searched: self.describe_search(),
        };

        if has_dir_component(program) {
            return if is_executable(program) {
                Ok(program.to_path_buf())
            } else {
                Err(not_found())
            };
        }

        let path_dirs = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect::<Vec<_>>())
            .unwrap_or_default();

        for dir in self.search_dirs.iter().chain(path_dirs.iter()) {
            if let Some(found) = find_in_dir(dir, program) {
                return Ok(found);
            }
        }

        Err(not_found())
    }

    fn describe_search(&self) -> String {
        let mut parts: Vec<String> = self
            .search_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        parts.push("PATH".to_string());
        parts.join(", ")
    }
}

fn has_dir_component(program: &Path) -> bool {
    program.is_absolute() || program.components().count() > 1
}

fn find_in_dir(dir: &Path, program: &Path) -> Option<PathBuf> {
    let full = dir.join(program);
    if is_executable(&full) {
        return Some(full);
    }
    #[cfg(windows)]
    {
        let exe = full.with_extension("exe");
        if is_executable(&exe) {
            return Some(exe);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

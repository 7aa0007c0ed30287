//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::process::ToolPaths;

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// External tool locations.
    #[serde(default)]
    pub tools: ToolSettings,

    /// Scratch directory handling.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Encoder behaviour.
    #[serde(default)]
    pub conversion: ConversionSettings,

    /// Waveform extraction.
    #[serde(default)]
    pub waveform: WaveformSettings,

    /// Live level monitoring.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Config sections that can be saved independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Tools,
    Paths,
    Logging,
    Conversion,
    Waveform,
    Monitor,
}

impl ConfigSection {
    /// Every section, in file order.
    pub const ALL: [ConfigSection; 6] = [
        ConfigSection::Tools,
        ConfigSection::Paths,
        ConfigSection::Logging,
        ConfigSection::Conversion,
        ConfigSection::Waveform,
        ConfigSection::Monitor,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Tools => "tools",
            ConfigSection::Paths => "paths",
            ConfigSection::Logging => "logging",
            ConfigSection::Conversion => "conversion",
            ConfigSection::Waveform => "waveform",
            ConfigSection::Monitor => "monitor",
        }
    }

    /// Comment written above the section in generated files.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Tools => "External encoder and prober",
            ConfigSection::Paths => "Scratch files",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Conversion => "Archival conversion",
            ConfigSection::Waveform => "Waveform extraction",
            ConfigSection::Monitor => "Live level meter",
        }
    }
}

/// Locations and limits for ffmpeg/ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Encoder program name or path.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// Prober program name or path.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,

    /// Directories searched before PATH.
    #[serde(default)]
    pub search_dirs: Vec<String>,

    /// Prober timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Time between SIGTERM and forced kill, in milliseconds.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_terminate_grace() -> u64 {
    2000
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            search_dirs: Vec::new(),
            probe_timeout_secs: default_probe_timeout(),
            terminate_grace_ms: default_terminate_grace(),
        }
    }
}

impl ToolSettings {
    /// Tool locations for the process runner.
    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            ffmpeg: PathBuf::from(&self.ffmpeg),
            ffprobe: PathBuf::from(&self.ffprobe),
            search_dirs: self.search_dirs.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Scratch directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Directory holding raw captures and partial outputs.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Scratch files older than this are removed at startup.
    #[serde(default = "default_orphan_max_age")]
    pub orphan_max_age_secs: u64,
}

fn default_scratch_dir() -> String {
    ".scratch".to_string()
}

fn default_orphan_max_age() -> u64 {
    24 * 60 * 60
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            orphan_max_age_secs: default_orphan_max_age(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is unset.
    #[serde(default)]
    pub level: LogLevel,

    /// Number of stderr lines kept per process.
    #[serde(default = "default_stderr_tail")]
    pub stderr_tail: usize,
}

fn default_stderr_tail() -> usize {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            stderr_tail: default_stderr_tail(),
        }
    }
}

/// Encoder behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Encoder timeout in seconds.
    #[serde(default = "default_conversion_timeout")]
    pub timeout_secs: u64,

    /// Re-probe the output and compare it against the request.
    #[serde(default = "default_true")]
    pub verify_output: bool,
}

fn default_true() -> bool {
    true
}

fn default_conversion_timeout() -> u64 {
    300
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_conversion_timeout(),
            verify_output: true,
        }
    }
}

/// Waveform extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformSettings {
    /// Bin count used when callers do not ask for one.
    #[serde(default = "default_bins")]
    pub default_bins: usize,

    /// Shortest time a single bin may cover, in milliseconds.
    #[serde(default = "default_min_bin_ms")]
    pub min_bin_ms: f64,

    /// Decoder timeout in seconds.
    #[serde(default = "default_decode_timeout")]
    pub decode_timeout_secs: u64,
}

fn default_bins() -> usize {
    1000
}

fn default_min_bin_ms() -> f64 {
    1.0
}

fn default_decode_timeout() -> u64 {
    60
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            default_bins: default_bins(),
            min_bin_ms: default_min_bin_ms(),
            decode_timeout_secs: default_decode_timeout(),
        }
    }
}

/// Live level meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Time between readings, in milliseconds.
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Bytes read from the end of the capture per reading.
    #[serde(default = "default_window_bytes")]
    pub window_bytes: usize,

    /// Weight of the newest reading in the smoothed level.
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

fn default_interval() -> u64 {
    50
}

fn default_window_bytes() -> usize {
    8192
}

fn default_smoothing() -> f32 {
    0.3
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            window_bytes: default_window_bytes(),
            smoothing: default_smoothing(),
        }
    }
}

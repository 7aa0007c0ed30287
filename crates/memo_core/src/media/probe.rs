//! Media metadata via `ffprobe -print_format json`.
//!
//! Provides the duration, codec, sample rate and channel layout of the
//! first audio stream of a file, plus tool version and encoder listings.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::models::{AudioFormat, MediaTarget, Quality};
use crate::process::{CancelToken, CommandSpec, ProcessError, ProcessRunner, Tool};

/// Default prober timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads stream metadata through the prober.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    runner: ProcessRunner,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(ProcessRunner::from_settings(settings))
            .with_timeout(Duration::from_secs(settings.tools.probe_timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a file's first audio stream.
    pub fn probe(&self, path: &Path) -> CoreResult<MediaTarget> {
        self.probe_with_cancel(path, &CancelToken::new())
    }

    /// Probe a file, aborting if `cancel` fires.
    pub fn probe_with_cancel(&self, path: &Path, cancel: &CancelToken) -> CoreResult<MediaTarget> {
        match path.metadata() {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(meta) if meta.is_file() => return Err(CoreError::unreadable(path, "file is empty")),
            Ok(_) => return Err(CoreError::unreadable(path, "not a regular file")),
            Err(e) => return Err(CoreError::unreadable(path, e.to_string())),
        }

        tracing::debug!("Probing file: {}", path.display());

        let spec = CommandSpec::new(self.runner.tools().program(Tool::Ffprobe))
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .timeout(self.timeout);

        let output = self.runner.run(spec, cancel).map_err(|e| match e {
            ProcessError::NonZeroExit { stderr, .. } => {
                let reason = if stderr.is_empty() {
                    "prober rejected the file".to_string()
                } else {
                    stderr
                };
                CoreError::unreadable(path, reason)
            }
            other => other.into(),
        })?;

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CoreError::unreadable(path, format!("invalid prober output: {}", e)))?;

        parse_probe_json(&json, path)
    }

    /// First line of `<tool> -version`.
    pub fn tool_version(&self, tool: Tool) -> CoreResult<String> {
        let spec = CommandSpec::new(self.runner.tools().program(tool))
            .arg("-version")
            .timeout(self.timeout);
        let output = self.runner.run(spec, &CancelToken::new())?;
        Ok(output
            .stdout_text()
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Audio encoder names reported by `ffmpeg -encoders`.
    pub fn available_encoders(&self) -> CoreResult<Vec<String>> {
        let spec = CommandSpec::new(self.runner.tools().program(Tool::Ffmpeg))
            .args(["-hide_banner", "-encoders"])
            .timeout(self.timeout);
        let output = self.runner.run(spec, &CancelToken::new())?;
        Ok(parse_encoder_list(&output.stdout_text()))
    }

    /// Check if the encoder needed for `format` is installed.
    pub fn supports_format(&self, format: AudioFormat) -> CoreResult<bool> {
        let encoder = format.spec().encoder;
        Ok(self.available_encoders()?.iter().any(|e| e == encoder))
    }
}

/// Parse the JSON output from ffprobe.
fn parse_probe_json(json: &Value, path: &Path) -> CoreResult<MediaTarget> {
    let stream = json
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("audio"))
        })
        .ok_or_else(|| CoreError::unreadable(path, "no audio stream"))?;

    let format = json.get("format");

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    if codec.is_empty() {
        return Err(CoreError::unreadable(path, "audio stream has no codec"));
    }

    let container = format
        .and_then(|f| f.get("format_name"))
        .and_then(|n| n.as_str())
        .and_then(|n| n.split(',').next())
        .unwrap_or_default()
        .to_string();

    let sample_rate = number_field(stream, "sample_rate").map(|r| r as u32);
    let channels = number_field(stream, "channels").map(|c| c as u16);

    // Stream-level duration wins; containers like WAV only give a format duration.
    let duration = number_field(stream, "duration")
        .or_else(|| format.and_then(|f| number_field(f, "duration")))
        .and_then(|d| Duration::try_from_secs_f64(d).ok());

    let bits = number_field(stream, "bits_per_sample")
        .filter(|b| *b > 0.0)
        .or_else(|| number_field(stream, "bits_per_raw_sample").filter(|b| *b > 0.0));
    let quality = match (codec.starts_with("pcm_"), bits, number_field(stream, "bit_rate")) {
        (true, Some(bits), _) => Quality::BitDepth(bits as u16),
        (_, _, Some(rate)) => Quality::BitRate(rate as u32),
        (_, Some(bits), None) => Quality::BitDepth(bits as u16),
        _ => Quality::Unknown,
    };

    Ok(MediaTarget {
        path: path.to_path_buf(),
        container,
        codec,
        sample_rate,
        quality,
        channels,
        duration,
    })
}

/// ffprobe emits most numbers as strings; accept either.
fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Names of audio encoders from `ffmpeg -encoders` output.
fn parse_encoder_list(text: &str) -> Vec<String> {
    text.lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            flags.starts_with('A').then(|| name.to_string())
        })
        .collect()
}

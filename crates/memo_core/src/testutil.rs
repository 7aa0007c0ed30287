//! Shared fixtures for unit tests: stand-in tools and WAV files.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::{ProcessRunner, ToolPaths};

/// Write an executable `sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let path = bin.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Runner whose ffmpeg and ffprobe are the given script bodies.
///
/// Inside a script `$last` holds the final argument.
pub fn fake_runner(dir: &Path, ffmpeg_body: &str, ffprobe_body: &str) -> ProcessRunner {
    let prelude = "for last; do :; done\n";
    let ffmpeg = write_script(dir, "ffmpeg", &format!("{}{}", prelude, ffmpeg_body));
    let ffprobe = write_script(dir, "ffprobe", &format!("{}{}", prelude, ffprobe_body));
    ProcessRunner::new(ToolPaths::default().with_ffmpeg(ffmpeg).with_ffprobe(ffprobe))
        .with_grace_period(Duration::from_millis(200))
}

/// ffprobe-style JSON for a single audio stream.
pub fn probe_json(codec: &str, sample_rate: u32, channels: u16, duration: Option<f64>) -> String {
    let duration = duration
        .map(|d| format!(r#", "duration": "{:.6}""#, d))
        .unwrap_or_default();
    format!(
        r#"{{"streams": [{{"index": 0, "codec_type": "audio", "codec_name": "{}", "sample_rate": "{}", "channels": {}, "bits_per_sample": 16}}], "format": {{"format_name": "{}"{}}}}}"#,
        codec, sample_rate, channels, codec, duration
    )
}

/// Script body that prints `json` on stdout.
pub fn echo_json(json: &str) -> String {
    format!("cat <<'EOF'\n{}\nEOF", json)
}

pub fn write_bytes(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Write a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

/// Interleaved s16le bytes.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Tool paths for a real ffmpeg install, if one is on PATH.
pub fn real_tools() -> Option<ToolPaths> {
    let tools = ToolPaths::default();
    let ffmpeg = tools.resolve(&tools.ffmpeg).ok()?;
    let ffprobe = tools.resolve(&tools.ffprobe).ok()?;
    Some(ToolPaths::default().with_ffmpeg(ffmpeg).with_ffprobe(ffprobe))
}

//! Encoder command-line construction.

use std::ffi::OsString;
use std::path::Path;

use crate::models::CodecConfig;

/// Arguments for encoding `source` into `output` with `config`.
///
/// `output` is always a private scratch path owned by the running job, so
/// the encoder may overwrite it; the destination overwrite policy is
/// enforced when the finished file is moved into place.
pub fn encoder_args(source: &Path, output: &Path, config: &CodecConfig) -> Vec<OsString> {
    let spec = config.format.spec();
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.as_os_str().to_os_string());

    args.extend(
        [
            "-vn".to_string(),
            "-c:a".to_string(),
            spec.encoder.to_string(),
            "-ar".to_string(),
            config.sample_rate.to_string(),
            "-ac".to_string(),
            config.channels.to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );

    if let Some(bit_rate) = config.bit_rate {
        args.push("-b:a".into());
        args.push(bit_rate.to_string().into());
    }

    if let Some(level) = config.compression_level {
        args.push("-compression_level".into());
        args.push(level.to_string().into());
    }

    args.push("-progress".into());
    args.push("pipe:2".into());
    args.push(output.as_os_str().to_os_string());
    args
}

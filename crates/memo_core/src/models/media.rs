//! Media descriptions (source and destination audio files).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::codec::CodecConfig;

/// Bit rate or bit depth of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    /// Compressed stream bit rate in bps.
    BitRate(u32),
    /// PCM sample depth in bits.
    BitDepth(u16),
    #[default]
    Unknown,
}

/// An audio file on disk and a description of its contents.
///
/// Immutable once built. Targets built from a [`CodecConfig`] describe what
/// the converter is asked to produce; targets returned by the prober also
/// carry the measured duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTarget {
    pub path: PathBuf,
    /// Container name as reported by the prober (e.g. "wav", "ogg").
    pub container: String,
    /// Audio codec name as reported by the prober (e.g. "pcm_s16le").
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub quality: Quality,
    pub channels: Option<u16>,
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl MediaTarget {
    /// A path whose contents have not been probed yet.
    pub fn unprobed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            container: String::new(),
            codec: String::new(),
            sample_rate: None,
            quality: Quality::Unknown,
            channels: None,
            duration: None,
        }
    }

    /// The file the converter should produce for `config`.
    pub fn from_config(path: impl Into<PathBuf>, config: &CodecConfig) -> Self {
        let spec = config.format.spec();
        let quality = match config.bit_rate {
            Some(rate) => Quality::BitRate(rate),
            None => Quality::BitDepth(16),
        };
        Self {
            path: path.into(),
            container: spec.extension.to_string(),
            codec: spec.encoder.to_string(),
            sample_rate: Some(config.sample_rate),
            quality,
            channels: Some(config.channels),
            duration: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a prober has filled in the stream details.
    pub fn is_probed(&self) -> bool {
        !self.codec.is_empty() && self.sample_rate.is_some() && self.channels.is_some()
    }
}

/// Interleaved sample encoding of a raw capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    #[default]
    S16Le,
    /// 32-bit float little-endian.
    F32Le,
}

impl SampleFormat {
    /// Bytes per single-channel sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::F32Le => 4,
        }
    }

    /// Decode one sample to the range [-1.0, 1.0].
    pub fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            SampleFormat::F32Le => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).clamp(-1.0, 1.0)
            }
        }
    }
}

/// Layout of interleaved PCM frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmLayout {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl Default for PcmLayout {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            format: SampleFormat::S16Le,
        }
    }
}

impl PcmLayout {
    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels.max(1) as usize
    }

    /// Byte rate of the stream.
    pub fn bytes_per_second(&self) -> u64 {
        self.frame_bytes() as u64 * self.sample_rate as u64
    }
}

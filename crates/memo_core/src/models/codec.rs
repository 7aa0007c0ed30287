//! Archival formats and codec configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Output formats supported by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    #[default]
    Opus,
    Vorbis,
    Flac,
    Wav,
}

impl AudioFormat {
    /// Every supported format, in display order.
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Mp3,
        AudioFormat::Aac,
        AudioFormat::Opus,
        AudioFormat::Vorbis,
        AudioFormat::Flac,
        AudioFormat::Wav,
    ];

    /// Static capabilities of this format.
    pub fn spec(&self) -> &'static FormatSpec {
        match self {
            AudioFormat::Mp3 => &MP3,
            AudioFormat::Aac => &AAC,
            AudioFormat::Opus => &OPUS,
            AudioFormat::Vorbis => &VORBIS,
            AudioFormat::Flac => &FLAC,
            AudioFormat::Wav => &WAV,
        }
    }

    /// Lowercase identifier used in config files.
    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Opus => "opus",
            AudioFormat::Vorbis => "vorbis",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
        }
    }

    /// Parse a format from its identifier (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Check whether a prober codec name belongs to this format.
    pub fn matches_codec(&self, codec_name: &str) -> bool {
        let codec = codec_name.to_ascii_lowercase();
        self.spec().probe_codecs.iter().any(|c| *c == codec)
    }

    /// Check if this format stores samples without loss.
    pub fn is_lossless(&self) -> bool {
        self.spec().bit_rates.is_none()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

/// Read-only description of what a format accepts.
#[derive(Debug, PartialEq, Eq)]
pub struct FormatSpec {
    /// File extension without the dot.
    pub extension: &'static str,
    /// Encoder passed to `-c:a`.
    pub encoder: &'static str,
    /// Codec names the prober reports for files of this format.
    pub probe_codecs: &'static [&'static str],
    /// Allowed sample rates in Hz.
    pub sample_rates: &'static [u32],
    /// Allowed bit rates in bps; `None` for lossless formats.
    pub bit_rates: Option<&'static [u32]>,
    /// Allowed channel counts.
    pub channels: &'static [u16],
    /// Allowed compression levels, if the encoder takes one.
    pub compression_levels: Option<&'static [u8]>,
}

const MONO_STEREO: &[u16] = &[1, 2];
const COMMON_RATES: &[u32] = &[8000, 16000, 22050, 44100, 48000];
const HIRES_RATES: &[u32] = &[8000, 16000, 22050, 44100, 48000, 96000];

static MP3: FormatSpec = FormatSpec {
    extension: "mp3",
    encoder: "libmp3lame",
    probe_codecs: &["mp3"],
    sample_rates: COMMON_RATES,
    bit_rates: Some(&[64000, 96000, 128000, 160000, 192000, 256000, 320000]),
    channels: MONO_STEREO,
    compression_levels: None,
};

static AAC: FormatSpec = FormatSpec {
    extension: "m4a",
    encoder: "aac",
    probe_codecs: &["aac"],
    sample_rates: COMMON_RATES,
    bit_rates: Some(&[64000, 96000, 128000, 192000, 256000]),
    channels: MONO_STEREO,
    compression_levels: None,
};

static OPUS: FormatSpec = FormatSpec {
    extension: "opus",
    encoder: "libopus",
    probe_codecs: &["opus"],
    sample_rates: &[8000, 12000, 16000, 24000, 48000],
    bit_rates: Some(&[16000, 24000, 32000, 64000, 96000, 128000]),
    channels: MONO_STEREO,
    compression_levels: None,
};

static VORBIS: FormatSpec = FormatSpec {
    extension: "ogg",
    encoder: "libvorbis",
    probe_codecs: &["vorbis"],
    sample_rates: COMMON_RATES,
    bit_rates: Some(&[64000, 80000, 96000, 112000, 128000, 160000, 192000, 256000]),
    channels: MONO_STEREO,
    compression_levels: None,
};

static FLAC: FormatSpec = FormatSpec {
    extension: "flac",
    encoder: "flac",
    probe_codecs: &["flac"],
    sample_rates: HIRES_RATES,
    bit_rates: None,
    channels: MONO_STEREO,
    compression_levels: Some(&[0, 1, 2, 3, 4, 5, 6, 7, 8]),
};

static WAV: FormatSpec = FormatSpec {
    extension: "wav",
    encoder: "pcm_s16le",
    probe_codecs: &["pcm_s16le"],
    sample_rates: HIRES_RATES,
    bit_rates: None,
    channels: MONO_STEREO,
    compression_levels: None,
};

/// Encoder settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub format: AudioFormat,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output bit rate in bps; must be `None` for lossless formats.
    #[serde(default)]
    pub bit_rate: Option<u32>,
    /// Output channel count.
    pub channels: u16,
    /// FLAC compression level.
    #[serde(default)]
    pub compression_level: Option<u8>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::lossy(AudioFormat::Opus, 24000, 32000, 1)
    }
}

impl CodecConfig {
    /// Lossy configuration with an explicit bit rate.
    pub fn lossy(format: AudioFormat, sample_rate: u32, bit_rate: u32, channels: u16) -> Self {
        Self {
            format,
            sample_rate,
            bit_rate: Some(bit_rate),
            channels,
            compression_level: None,
        }
    }

    /// Lossless configuration.
    pub fn lossless(format: AudioFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            format,
            sample_rate,
            bit_rate: None,
            channels,
            compression_level: None,
        }
    }

    /// Set the compression level.
    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Check if the output is lossless.
    pub fn is_lossless(&self) -> bool {
        self.format.is_lossless()
    }

    /// Output file extension without the dot.
    pub fn extension(&self) -> &'static str {
        self.format.spec().extension
    }

    /// Check the configuration against the format's capabilities.
    pub fn validate(&self) -> CoreResult<()> {
        let spec = self.format.spec();

        if !spec.sample_rates.contains(&self.sample_rate) {
            return Err(CoreError::invalid_config(format!(
                "{} does not support a sample rate of {} Hz",
                self.format, self.sample_rate
            )));
        }

        if !spec.channels.contains(&self.channels) {
            return Err(CoreError::invalid_config(format!(
                "{} does not support {} channels",
                self.format, self.channels
            )));
        }

        match (spec.bit_rates, self.bit_rate) {
            (Some(allowed), Some(rate)) if !allowed.contains(&rate) => {
                return Err(CoreError::invalid_config(format!(
                    "{} does not support a bit rate of {} bps",
                    self.format, rate
                )));
            }
            (Some(_), None) => {
                return Err(CoreError::invalid_config(format!(
                    "{} requires a bit rate",
                    self.format
                )));
            }
            (None, Some(_)) => {
                return Err(CoreError::invalid_config(format!(
                    "{} is lossless and takes no bit rate",
                    self.format
                )));
            }
            _ => {}
        }

        if let Some(level) = self.compression_level {
            match spec.compression_levels {
                Some(levels) if levels.contains(&level) => {}
                Some(_) => {
                    return Err(CoreError::invalid_config(format!(
                        "{} compression level {} is out of range",
                        self.format, level
                    )));
                }
                None => {
                    return Err(CoreError::invalid_config(format!(
                        "{} takes no compression level",
                        self.format
                    )));
                }
            }
        }

        Ok(())
    }

    /// Short human-readable summary, e.g. `MP3 44kHz 128kbps Mono`.
    pub fn summary(&self) -> String {
        let layout = if self.channels == 2 { "Stereo" } else { "Mono" };
        match self.bit_rate {
            Some(rate) => format!(
                "{} {}kHz {}kbps {}",
                self.format,
                self.sample_rate / 1000,
                rate / 1000,
                layout
            ),
            None => format!("{} {}kHz {}", self.format, self.sample_rate / 1000, layout),
        }
    }

    /// Named configurations for common recording situations.
    pub fn presets() -> Vec<(&'static str, CodecConfig)> {
        vec![
            ("Voice - Low Quality", Self::lossy(AudioFormat::Opus, 16000, 24000, 1)),
            ("Voice - Standard", Self::lossy(AudioFormat::Opus, 24000, 32000, 1)),
            ("Voice - High Quality", Self::lossy(AudioFormat::Mp3, 44100, 128000, 1)),
            ("Podcast Standard", Self::lossy(AudioFormat::Mp3, 44100, 96000, 1)),
            ("Music - Standard", Self::lossy(AudioFormat::Mp3, 44100, 192000, 2)),
            ("Music - High Quality", Self::lossy(AudioFormat::Aac, 48000, 256000, 2)),
            (
                "Music - Lossless",
                Self::lossless(AudioFormat::Flac, 48000, 2).with_compression_level(5),
            ),
            (
                "Archival - Maximum Compression",
                Self::lossless(AudioFormat::Flac, 48000, 2).with_compression_level(8),
            ),
            ("Uncompressed WAV", Self::lossless(AudioFormat::Wav, 44100, 2)),
        ]
    }
}

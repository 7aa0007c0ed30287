//! Waveform extraction via ffmpeg decoding to stdout.

use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::media::MediaProbe;
use crate::models::WaveformData;
use crate::process::{CancelToken, CommandSpec, ProcessError, ProcessRunner, Tool};

use super::reduce::{bin_count_for, PeakAccumulator, Peaks};

/// Default decoder timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default shortest time one bin may cover.
const DEFAULT_MIN_BIN: Duration = Duration::from_millis(1);

const READ_CHUNK: usize = 64 * 1024;

/// Derives amplitude envelopes from audio files.
#[derive(Debug, Clone)]
pub struct WaveformExtractor {
    runner: ProcessRunner,
    probe: MediaProbe,
    timeout: Duration,
    min_bin: Duration,
}

impl WaveformExtractor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            probe: MediaProbe::new(runner.clone()),
            runner,
            timeout: DEFAULT_TIMEOUT,
            min_bin: DEFAULT_MIN_BIN,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            runner: ProcessRunner::from_settings(settings),
            probe: MediaProbe::from_settings(settings),
            timeout: Duration::from_secs(settings.waveform.decode_timeout_secs),
            min_bin: Duration::try_from_secs_f64(settings.waveform.min_bin_ms / 1000.0)
                .unwrap_or(DEFAULT_MIN_BIN),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shortest time a single bin may cover.
    pub fn with_min_bin_duration(mut self, min_bin: Duration) -> Self {
        self.min_bin = min_bin;
        self
    }

    /// Decode `path` and reduce it to at most `bin_count` peak bins.
    pub fn extract(&self, path: &Path, bin_count: usize) -> CoreResult<WaveformData> {
        self.extract_with_cancel(path, bin_count, &CancelToken::new())
    }

    /// Like [`extract`](Self::extract), abandoning the decode if `cancel` fires.
    pub fn extract_with_cancel(
        &self,
        path: &Path,
        bin_count: usize,
        cancel: &CancelToken,
    ) -> CoreResult<WaveformData> {
        if bin_count == 0 {
            return Err(CoreError::invalid_config("waveform needs at least one bin"));
        }

        let target = self.probe.probe_with_cancel(path, cancel)?;
        let (Some(sample_rate), Some(channels)) = (target.sample_rate, target.channels) else {
            return Err(CoreError::unreadable(path, "stream has no sample rate or channel layout"));
        };
        if sample_rate == 0 || channels == 0 {
            return Err(CoreError::unreadable(path, "stream has an empty layout"));
        }

        tracing::debug!(
            "Extracting {} bins from {} ({} Hz, {} ch)",
            bin_count,
            path.display(),
            sample_rate,
            channels
        );

        let spec = CommandSpec::new(self.runner.tools().program(Tool::Ffmpeg))
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-vn", "-map", "0:a:0", "-f", "s16le", "-acodec", "pcm_s16le"])
            .args(["-ac".to_string(), channels.to_string()])
            .arg("pipe:1")
            .timeout(self.timeout);

        let min_window = (self.min_bin.as_secs_f64() * sample_rate as f64).floor() as u64;
        let planned_frames = target
            .duration
            .map(|d| (d.as_secs_f64() * sample_rate as f64).round() as u64)
            .filter(|&n| n > 0);

        let mut handle = self.runner.spawn(spec, cancel, None)?;
        let mut accumulator = match planned_frames {
            Some(total) => PeakAccumulator::with_known_length(
                channels,
                bin_count_for(bin_count, total, min_window),
                total,
            ),
            None => PeakAccumulator::new(channels, bin_count),
        };

        let read_result = match handle.take_stdout() {
            Some(mut stdout) => pump(&mut stdout, &mut accumulator),
            None => Ok(()),
        };
        let decode_result = handle.wait();

        let peaks = accumulator.finish();
        let frames = peaks.frames();

        if frames == 0 {
            return Err(match decode_result {
                Err(ProcessError::NonZeroExit { stderr, .. }) if !stderr.is_empty() => {
                    CoreError::unreadable(path, stderr)
                }
                Ok(_) | Err(ProcessError::NonZeroExit { .. }) => {
                    CoreError::unreadable(path, "decoder produced no audio")
                }
                Err(other) => other.into(),
            });
        }

        let decoded = Duration::from_secs_f64(frames as f64 / sample_rate as f64);

        match decode_result {
            Ok(_) => {
                if let Err(e) = read_result {
                    return Err(CoreError::io(format!("read decoded audio of {}", path.display()), e));
                }
                let bins = match &peaks {
                    // A probe that overstated the length leaves trailing windows empty.
                    Peaks::Windows(windows) => windows.received(),
                    Peaks::Blocks(pyramid) => {
                        pyramid.reduce(bin_count_for(bin_count, frames, min_window), frames)
                    }
                };
                Ok(WaveformData {
                    bins,
                    duration: target.duration.unwrap_or(decoded),
                    truncated: false,
                })
            }
            Err(ProcessError::NonZeroExit { stderr, .. }) => {
                // Windows keep the layout the complete source would have had.
                let (kept, planned) = match &peaks {
                    Peaks::Windows(windows) => (windows.complete(), windows.bins()),
                    Peaks::Blocks(pyramid) => {
                        let bins = bin_count_for(bin_count, frames, min_window);
                        (pyramid.reduce(bins, frames), bins)
                    }
                };
                if kept.is_empty() {
                    return Err(CoreError::truncated(path, format!(
                        "decoder stopped after {:.3}s: {}",
                        decoded.as_secs_f64(),
                        stderr
                    )));
                }
                tracing::warn!(
                    "Decoding {} stopped early; kept {} of {} bins",
                    path.display(),
                    kept.len(),
                    planned
                );
                Ok(WaveformData {
                    bins: kept,
                    duration: target.duration.unwrap_or(decoded),
                    truncated: true,
                })
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Read the decoder's stdout to EOF.
fn pump(stdout: &mut impl Read, accumulator: &mut PeakAccumulator) -> io::Result<()> {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => accumulator.push_bytes(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testutil::{echo_json, fake_runner, pcm_bytes, probe_json, write_bytes};

    /// Mono 8 kHz sine at half scale.
    fn tone(seconds: f64) -> Vec<i16> {
        let frames = (8000.0 * seconds) as usize;
        (0..frames)
            .map(|i| {
                let t = i as f64 / 8000.0;
                (16384.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16
            })
            .collect()
    }

    fn extractor(dir: &Path, pcm: &[i16], duration: f64, exit_code: i32) -> (WaveformExtractor, std::path::PathBuf) {
        let raw = write_bytes(dir, "decoded.raw", &pcm_bytes(pcm));
        let ffmpeg = format!("cat '{}'\nexit {}", raw.display(), exit_code);
        let ffprobe = echo_json(&probe_json("pcm_s16le", 8000, 1, Some(duration)));
        let input = write_bytes(dir, "capture.wav", b"RIFF-placeholder");
        (WaveformExtractor::new(fake_runner(dir, &ffmpeg, &ffprobe)), input)
    }

    #[test]
    fn ten_second_tone_gives_requested_bins() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &tone(10.0), 10.0, 0);

        let data = extractor.extract(&input, 100).unwrap();
        assert_eq!(data.len(), 100);
        assert!(!data.truncated);
        assert_eq!(data.duration, Duration::from_secs(10));
        for peak in &data.bins {
            assert!((peak - 0.5).abs() < 0.02, "peak {peak}");
        }
    }

    #[test]
    fn transient_on_a_window_edge_lands_in_one_bin() {
        let dir = tempfile::tempdir().unwrap();
        // 8001 frames over 10 bins: the second window starts at frame 800.
        let mut pcm = vec![0i16; 8001];
        pcm[800] = 16384;
        let (extractor, input) = extractor(dir.path(), &pcm, 1.000125, 0);

        let data = extractor.extract(&input, 10).unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data.bins[0], 0.0);
        assert_eq!(data.bins[1], 0.5);
        assert!(data.bins[2..].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn clean_decode_shorter_than_reported_keeps_received_bins() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &tone(1.0), 2.0, 0);

        let data = extractor.extract(&input, 10).unwrap();
        assert!(!data.truncated);
        assert_eq!(data.len(), 5);
    }

    #[test]
    fn short_clip_gives_fewer_bins() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &tone(0.05), 0.05, 0);

        let data = extractor.extract(&input, 100).unwrap();
        assert!(!data.is_empty());
        assert!(data.len() < 100);
        assert!(data.bins.iter().all(|b| (0.0..=1.0).contains(b)));
    }

    #[test]
    fn early_exit_keeps_complete_bins() {
        let dir = tempfile::tempdir().unwrap();
        // 2.5 s of a 10 s source arrives before the decoder fails.
        let (extractor, input) = extractor(dir.path(), &tone(2.5), 10.0, 1);

        let data = extractor.extract(&input, 100).unwrap();
        assert!(data.truncated);
        assert_eq!(data.len(), 25);
    }

    #[test]
    fn early_exit_without_a_full_bin_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &tone(0.01), 10.0, 1);

        let err = extractor.extract(&input, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn no_decoded_data_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &[], 1.0, 1);

        let err = extractor.extract(&input, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableMedia);
    }

    #[test]
    fn zero_bins_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (extractor, input) = extractor(dir.path(), &tone(1.0), 1.0, 0);
        let err = extractor.extract(&input, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn real_ffmpeg_decodes_wav() {
        let Some(tools) = crate::testutil::real_tools() else {
            eprintln!("ffmpeg not installed, skipping");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        crate::testutil::write_wav(&path, 8000, 1, &tone(2.0));

        let data = WaveformExtractor::new(ProcessRunner::new(tools))
            .extract(&path, 50)
            .unwrap();
        assert_eq!(data.len(), 50);
        assert!((data.max_peak() - 0.5).abs() < 0.02);
    }
}

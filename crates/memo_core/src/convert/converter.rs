//! One source file to one archival file through the encoder.
//!
//! The encoder always writes to a private scratch file next to the
//! destination. Only a complete, verified output is moved into place, so
//! the destination path never holds a partial file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::media::MediaProbe;
use crate::models::{
    AudioFormat, CodecConfig, ConversionEstimate, ConversionJob, ConversionOutcome,
    OverwritePolicy, ProgressCallback,
};
use crate::process::{CancelToken, CommandSpec, LineSink, ProcessRunner, StdoutMode, Tool};
use crate::temp::{ScratchDirRegistry, TempResourceGuard};

use super::args::encoder_args;
use super::claims::DestinationClaims;
use super::progress::{parse_progress_time, ProgressTracker};

/// Default encoder timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Encoding speed assumed by [`FormatConverter::estimate`], as a multiple of realtime.
const ESTIMATED_SPEED: u32 = 10;

/// Progress positions buffered between the stderr reader and the caller.
const PROGRESS_BUFFER: usize = 64;

/// Converts recordings to archival formats.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    runner: ProcessRunner,
    probe: MediaProbe,
    claims: DestinationClaims,
    scratch_dirs: Option<ScratchDirRegistry>,
    timeout: Duration,
    verify_output: bool,
}

impl FormatConverter {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            probe: MediaProbe::new(runner.clone()),
            runner,
            claims: DestinationClaims::new(),
            scratch_dirs: None,
            timeout: DEFAULT_TIMEOUT,
            verify_output: true,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            runner: ProcessRunner::from_settings(settings),
            probe: MediaProbe::from_settings(settings),
            claims: DestinationClaims::new(),
            scratch_dirs: Some(ScratchDirRegistry::in_scratch_dir(Path::new(
                &settings.paths.scratch_dir,
            ))),
            timeout: Duration::from_secs(settings.conversion.timeout_secs),
            verify_output: settings.conversion.verify_output,
        }
    }

    /// Share a claim set with other converters.
    pub fn with_claims(mut self, claims: DestinationClaims) -> Self {
        self.claims = claims;
        self
    }

    /// Record every directory that receives a partial output in `registry`.
    pub fn with_scratch_registry(mut self, registry: ScratchDirRegistry) -> Self {
        self.scratch_dirs = Some(registry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable re-probing the output.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_output = verify;
        self
    }

    pub fn claims(&self) -> &DestinationClaims {
        &self.claims
    }

    /// Run a conversion job to completion.
    ///
    /// All cleanup has happened by the time this returns, and `progress` is
    /// never called afterwards.
    pub fn convert(
        &self,
        job: &ConversionJob,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> ConversionOutcome {
        let started = Instant::now();
        let destination = job.destination.path();

        match self.try_convert(job, cancel, progress) {
            Ok(outcome) => {
                tracing::info!(
                    "Converted {} -> {} in {:.2}s",
                    job.source.path().display(),
                    destination.display(),
                    started.elapsed().as_secs_f64()
                );
                outcome
            }
            Err(err) => {
                if err.kind() == ErrorKind::Cancelled {
                    tracing::info!("Conversion to {} cancelled", destination.display());
                } else {
                    tracing::warn!("Conversion to {} failed: {}", destination.display(), err);
                }
                ConversionOutcome::from_error(&err)
            }
        }
    }

    /// Convert several files with one configuration.
    ///
    /// Each output is named after its source with the format's extension,
    /// in `output_dir` or next to the source. Once `cancel` fires the
    /// remaining files are reported as cancelled without being started.
    pub fn convert_batch(
        &self,
        sources: &[PathBuf],
        config: &CodecConfig,
        output_dir: Option<&Path>,
        overwrite: OverwritePolicy,
        cancel: &CancelToken,
    ) -> Vec<ConversionOutcome> {
        sources
            .iter()
            .map(|source| {
                if cancel.is_cancelled() {
                    return ConversionOutcome::Cancelled;
                }
                let destination = archive_path(source, config, output_dir);
                let job = ConversionJob::new(source, destination, config.clone())
                    .with_overwrite(overwrite);
                self.convert(&job, cancel, None)
            })
            .collect()
    }

    /// Expected output size and encoding time for a source of `duration`.
    pub fn estimate(duration: Duration, config: &CodecConfig) -> ConversionEstimate {
        let seconds = duration.as_secs_f64();
        let size = match config.bit_rate {
            Some(bit_rate) => bit_rate as f64 * seconds / 8.0,
            None => seconds * config.sample_rate as f64 * 2.0 * config.channels as f64,
        };
        ConversionEstimate {
            size_bytes: size.round() as u64,
            duration: duration / ESTIMATED_SPEED,
        }
    }

    /// Probe `source` and estimate its conversion.
    pub fn estimate_file(&self, source: &Path, config: &CodecConfig) -> CoreResult<ConversionEstimate> {
        let target = self.probe.probe(source)?;
        Ok(Self::estimate(target.duration.unwrap_or_default(), config))
    }

    fn try_convert(
        &self,
        job: &ConversionJob,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> CoreResult<ConversionOutcome> {
        let destination = job.destination.path();
        let _claim = self.claims.claim(destination)?;

        job.config.validate()?;

        if job.overwrite == OverwritePolicy::Never && destination.exists() {
            return Err(CoreError::conflict(destination, "file already exists"));
        }

        let source = job.source.path();
        if !source.is_file() {
            return Err(CoreError::unreadable(source, "source file not found"));
        }

        let source_duration = match job.source.duration {
            Some(duration) => Some(duration),
            None => self.source_duration(source, cancel)?,
        };

        let dest_dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(registry) = &self.scratch_dirs {
            if let Err(e) = registry.record(dest_dir) {
                tracing::warn!("Partial output in {} will not be swept: {}", dest_dir.display(), e);
            }
        }

        // Dropping the guard on any early return deletes the partial file.
        let guard = TempResourceGuard::new(dest_dir);
        let partial = guard.create(&stem, job.config.extension())?;

        tracing::debug!(
            "Encoding {} as {} into {}",
            source.display(),
            job.config.summary(),
            partial.path().display()
        );

        let mut tracker = ProgressTracker::new(source_duration);
        self.encode(source, partial.path(), &job.config, &mut tracker, cancel, progress)?;

        let output_duration = self.verify(partial.path(), destination, &job.config)?;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        match commit(partial.path(), destination, job.overwrite)? {
            Commit::Moved => {
                guard.persist(&partial);
            }
            Commit::Linked => {
                if let Err(e) = guard.release(&partial) {
                    tracing::warn!("{}", e);
                }
            }
        }

        if let (Some(event), Some(callback)) = (tracker.complete(), progress) {
            callback(event);
        }

        let size_bytes = fs::metadata(destination)
            .map(|m| m.len())
            .map_err(|e| CoreError::io(format!("stat {}", destination.display()), e))?;

        Ok(ConversionOutcome::Success {
            final_path: destination.to_path_buf(),
            duration: output_duration.or(source_duration),
            size_bytes,
        })
    }

    /// Source duration for progress; only unreadable input is fatal.
    fn source_duration(&self, source: &Path, cancel: &CancelToken) -> CoreResult<Option<Duration>> {
        match self.probe.probe_with_cancel(source, cancel) {
            Ok(target) => Ok(target.duration),
            Err(err) if matches!(err.kind(), ErrorKind::UnreadableMedia | ErrorKind::Cancelled) => {
                Err(err)
            }
            Err(err) => {
                tracing::warn!("Could not probe {}: {}", source.display(), err);
                Ok(None)
            }
        }
    }

    fn encode(
        &self,
        source: &Path,
        output: &Path,
        config: &CodecConfig,
        tracker: &mut ProgressTracker,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> CoreResult<()> {
        let (tx, rx) = crossbeam_channel::bounded(PROGRESS_BUFFER);
        let sink: LineSink = Box::new(move |line| {
            if let Some(position) = parse_progress_time(line) {
                let _ = tx.try_send(position);
            }
        });

        let spec = CommandSpec::new(self.runner.tools().program(Tool::Ffmpeg))
            .args(encoder_args(source, output, config))
            .timeout(self.timeout)
            .stdout(StdoutMode::Null);
        let handle = self.runner.spawn(spec, cancel, Some(sink))?;

        // Ends when the encoder closes stderr, which also drops the sender.
        for position in rx.iter() {
            if let (Some(event), Some(callback)) = (tracker.update(position), progress) {
                callback(event);
            }
        }

        handle.wait()?;
        Ok(())
    }

    /// Check the encoder output, returning its measured duration.
    fn verify(
        &self,
        output: &Path,
        destination: &Path,
        config: &CodecConfig,
    ) -> CoreResult<Option<Duration>> {
        let len = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(CoreError::partial_write(destination, "encoder produced no data"));
        }

        if !self.verify_output {
            return Ok(None);
        }

        let probed = self.probe.probe(output).map_err(|err| match err.kind() {
            ErrorKind::UnreadableMedia => {
                CoreError::partial_write(destination, format!("output is unreadable: {}", err.diagnostic()))
            }
            _ => err,
        })?;

        if !config.format.matches_codec(&probed.codec) {
            return Err(CoreError::partial_write(
                destination,
                format!("expected {} audio, found {}", config.format, probed.codec),
            ));
        }
        // Opus always decodes at 48 kHz, so the prober never reports the encode rate.
        if config.format != AudioFormat::Opus && probed.sample_rate != Some(config.sample_rate) {
            return Err(CoreError::partial_write(
                destination,
                format!(
                    "expected {} Hz, found {}",
                    config.sample_rate,
                    describe(probed.sample_rate)
                ),
            ));
        }
        if probed.channels != Some(config.channels) {
            return Err(CoreError::partial_write(
                destination,
                format!(
                    "expected {} channel(s), found {}",
                    config.channels,
                    describe(probed.channels)
                ),
            ));
        }

        Ok(probed.duration)
    }
}

/// Output path for `source` converted with `config`.
///
/// Uses the format's extension; a name that would collide with the source
/// gets a `_converted` suffix.
pub fn archive_path(source: &Path, config: &CodecConfig, output_dir: Option<&Path>) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| source.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    let candidate = dir.join(format!("{}.{}", stem, config.extension()));
    if candidate == source {
        dir.join(format!("{}_converted.{}", stem, config.extension()))
    } else {
        candidate
    }
}

enum Commit {
    /// Partial renamed onto the destination.
    Moved,
    /// Destination hard-linked to the partial, which still needs removing.
    Linked,
}

/// Move the finished file into place under the overwrite policy.
fn commit(partial: &Path, destination: &Path, policy: OverwritePolicy) -> CoreResult<Commit> {
    let rename = || {
        fs::rename(partial, destination)
            .map(|_| Commit::Moved)
            .map_err(|e| CoreError::io(format!("move into {}", destination.display()), e))
    };

    match policy {
        OverwritePolicy::Replace => rename(),
        // Linking fails if the name exists, so a file created meanwhile is never clobbered.
        OverwritePolicy::Never => match fs::hard_link(partial, destination) {
            Ok(()) => Ok(Commit::Linked),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(CoreError::conflict(destination, "file appeared during conversion"))
            }
            Err(e) => {
                tracing::debug!("Hard link unavailable ({}), falling back to rename", e);
                if destination.exists() {
                    return Err(CoreError::conflict(destination, "file appeared during conversion"));
                }
                rename()
            }
        },
    }
}

fn describe<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioFormat;

    #[test]
    fn estimate_uses_bit_rate_for_lossy() {
        let config = CodecConfig::lossy(AudioFormat::Mp3, 44100, 128000, 1);
        let estimate = FormatConverter::estimate(Duration::from_secs(60), &config);
        assert_eq!(estimate.size_bytes, 960_000);
        assert_eq!(estimate.duration, Duration::from_secs(6));
    }

    #[test]
    fn estimate_uses_pcm_size_for_lossless() {
        let config = CodecConfig::lossless(AudioFormat::Wav, 48000, 2);
        let estimate = FormatConverter::estimate(Duration::from_secs(10), &config);
        assert_eq!(estimate.size_bytes, 1_920_000);
    }

    #[test]
    fn archive_path_avoids_overwriting_source() {
        let wav = CodecConfig::lossless(AudioFormat::Wav, 44100, 1);
        assert_eq!(
            archive_path(Path::new("/rec/take.wav"), &wav, None),
            PathBuf::from("/rec/take_converted.wav")
        );
        let mp3 = CodecConfig::lossy(AudioFormat::Mp3, 44100, 128000, 1);
        assert_eq!(
            archive_path(Path::new("/rec/take.wav"), &mp3, Some(Path::new("/memos"))),
            PathBuf::from("/memos/take.mp3")
        );
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use crate::testutil::{fake_runner, probe_json, write_bytes};
        use crate::temp::TEMP_PREFIX;
        use std::sync::{Arc, Mutex};
        use std::thread;

        const ENCODE_OK: &str = "echo 'out_time_us=1000000' >&2\n\
            echo 'out_time_us=500000' >&2\n\
            echo 'out_time_us=2000000' >&2\n\
            echo 'progress=end' >&2\n\
            printf 'encoded-audio' > \"$last\"";

        struct Fixture {
            dir: tempfile::TempDir,
            source: PathBuf,
        }

        impl Fixture {
            /// Source probes as a 4 s WAV; everything else as `out_json`.
            fn new(out_json: &str) -> (Self, String) {
                let dir = tempfile::tempdir().unwrap();
                let src_json = dir.path().join("src.json");
                let out_path = dir.path().join("out.json");
                std::fs::write(&src_json, probe_json("pcm_s16le", 44100, 1, Some(4.0))).unwrap();
                std::fs::write(&out_path, out_json).unwrap();
                let source = write_bytes(dir.path(), "capture.wav", b"RIFF-capture");
                let ffprobe = format!(
                    "case \"$last\" in *.wav) cat '{}';; *) cat '{}';; esac",
                    src_json.display(),
                    out_path.display()
                );
                (Self { dir, source }, ffprobe)
            }

            fn converter(&self, ffmpeg: &str, ffprobe: &str) -> FormatConverter {
                FormatConverter::new(fake_runner(self.dir.path(), ffmpeg, ffprobe))
            }

            fn destination(&self, name: &str) -> PathBuf {
                self.dir.path().join(name)
            }

            fn leftover_partials(&self) -> usize {
                std::fs::read_dir(self.dir.path())
                    .unwrap()
                    .filter(|e| {
                        e.as_ref()
                            .unwrap()
                            .file_name()
                            .to_string_lossy()
                            .starts_with(TEMP_PREFIX)
                    })
                    .count()
            }
        }

        fn mp3_config() -> CodecConfig {
            CodecConfig::lossy(AudioFormat::Mp3, 44100, 128000, 1)
        }

        #[test]
        fn successful_conversion_reports_monotonic_progress() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, Some(4.0)));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let callback: ProgressCallback =
                Box::new(move |p| sink.lock().unwrap().push(p.fraction_complete));

            let outcome = converter.convert(&job, &CancelToken::new(), Some(&callback));

            match &outcome {
                ConversionOutcome::Success {
                    final_path,
                    duration,
                    size_bytes,
                } => {
                    assert_eq!(final_path, &dest);
                    assert_eq!(*duration, Some(Duration::from_secs(4)));
                    assert_eq!(*size_bytes, "encoded-audio".len() as u64);
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 1.0]);
            assert_eq!(fx.leftover_partials(), 0);
            assert!(!converter.claims().is_claimed(&dest));
        }

        #[test]
        fn failed_encode_leaves_no_destination() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(
                "printf 'half' > \"$last\"\necho \"Unknown encoder 'libmp3lame'\" >&2\nexit 1",
                &ffprobe,
            );
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let outcome = converter.convert(&job, &CancelToken::new(), None);

            match outcome {
                ConversionOutcome::Failed { kind, diagnostic } => {
                    assert_eq!(kind, ErrorKind::NonZeroExit);
                    assert!(diagnostic.contains("Unknown encoder"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(!dest.exists());
            assert_eq!(fx.leftover_partials(), 0);
        }

        #[test]
        fn partial_output_folder_is_recorded_before_encoding() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let scratch = fx.dir.path().join("scratch");
            let registry = crate::temp::ScratchDirRegistry::in_scratch_dir(&scratch);
            let converter = fx
                .converter("printf 'half' > \"$last\"\nexit 1", &ffprobe)
                .with_scratch_registry(registry.clone());
            let job = ConversionJob::new(&fx.source, fx.destination("memo.mp3"), mp3_config());

            assert!(!converter.convert(&job, &CancelToken::new(), None).is_success());
            assert_eq!(
                registry.dirs().unwrap(),
                vec![std::fs::canonicalize(fx.dir.path()).unwrap()]
            );
        }

        #[test]
        fn held_destination_is_rejected_before_spawning() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let marker = fx.destination("ran");
            let converter = fx.converter(
                &format!("touch '{}'\n{}", marker.display(), ENCODE_OK),
                &ffprobe,
            );
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let _held = converter.claims().claim(&dest).unwrap();
            let outcome = converter.convert(&job, &CancelToken::new(), None);

            assert_eq!(outcome.error_kind(), Some(ErrorKind::DestinationConflict));
            assert!(!marker.exists());
        }

        #[test]
        fn concurrent_jobs_on_one_destination_conflict() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(
                &format!("sleep 1\n{}", ENCODE_OK),
                &ffprobe,
            );
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let first = {
                let converter = converter.clone();
                let job = job.clone();
                thread::spawn(move || converter.convert(&job, &CancelToken::new(), None))
            };
            while !converter.claims().is_claimed(&dest) {
                thread::sleep(Duration::from_millis(5));
            }
            let second = converter.convert(&job, &CancelToken::new(), None);

            assert_eq!(second.error_kind(), Some(ErrorKind::DestinationConflict));
            assert!(first.join().unwrap().is_success());
        }

        #[test]
        fn existing_destination_respects_policy() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let dest = write_bytes(fx.dir.path(), "memo.mp3", b"older take");

            let job = ConversionJob::new(&fx.source, &dest, mp3_config());
            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert_eq!(outcome.error_kind(), Some(ErrorKind::DestinationConflict));
            assert_eq!(std::fs::read(&dest).unwrap(), b"older take");

            let job = job.with_overwrite(OverwritePolicy::Replace);
            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert!(outcome.is_success());
            assert_eq!(std::fs::read(&dest).unwrap(), b"encoded-audio");
        }

        #[test]
        fn cancel_removes_partial_output() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, Some(4.0)));
            let converter = fx.converter(
                "printf 'partial' > \"$last\"\nexec sleep 30",
                &ffprobe,
            );
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                trigger.cancel();
            });

            let outcome = converter.convert(&job, &cancel, None);
            canceller.join().unwrap();

            assert_eq!(outcome, ConversionOutcome::Cancelled);
            assert!(!dest.exists());
            assert_eq!(fx.leftover_partials(), 0);
        }

        #[test]
        fn empty_output_is_partial_write() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter("exit 0", &ffprobe);
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert_eq!(outcome.error_kind(), Some(ErrorKind::PartialWriteDetected));
            assert!(!dest.exists());
        }

        #[test]
        fn mismatched_output_is_partial_write() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 22050, 1, None));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let dest = fx.destination("memo.mp3");
            let job = ConversionJob::new(&fx.source, &dest, mp3_config());

            let outcome = converter.convert(&job, &CancelToken::new(), None);
            match outcome {
                ConversionOutcome::Failed { kind, diagnostic } => {
                    assert_eq!(kind, ErrorKind::PartialWriteDetected);
                    assert!(diagnostic.contains("44100"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(!dest.exists());
        }

        #[test]
        fn invalid_config_fails_before_encoding() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let dest = fx.destination("memo.opus");
            let config = CodecConfig::lossy(AudioFormat::Opus, 44100, 32000, 1);
            let job = ConversionJob::new(&fx.source, &dest, config);

            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidConfig));
        }

        #[test]
        fn missing_source_is_unreadable() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let job = ConversionJob::new(
                fx.destination("gone.wav"),
                fx.destination("memo.mp3"),
                mp3_config(),
            );
            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert_eq!(outcome.error_kind(), Some(ErrorKind::UnreadableMedia));
        }

        #[test]
        fn batch_stops_after_cancel() {
            let (fx, ffprobe) = Fixture::new(&probe_json("mp3", 44100, 1, None));
            let converter = fx.converter(ENCODE_OK, &ffprobe);
            let second = write_bytes(fx.dir.path(), "second.wav", b"RIFF-two");
            let out_dir = fx.destination("archive");
            std::fs::create_dir(&out_dir).unwrap();

            let outcomes = converter.convert_batch(
                &[fx.source.clone(), second],
                &mp3_config(),
                Some(&out_dir),
                OverwritePolicy::Never,
                &CancelToken::new(),
            );
            assert!(outcomes.iter().all(|o| o.is_success()));
            assert!(out_dir.join("capture.mp3").exists());
            assert!(out_dir.join("second.mp3").exists());

            let cancel = CancelToken::new();
            cancel.cancel();
            let outcomes = converter.convert_batch(
                &[fx.source.clone()],
                &mp3_config(),
                Some(&out_dir),
                OverwritePolicy::Replace,
                &cancel,
            );
            assert_eq!(outcomes, vec![ConversionOutcome::Cancelled]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn real_ffmpeg_every_available_format_reprobes() {
        let Some(tools) = crate::testutil::real_tools() else {
            eprintln!("ffmpeg not installed, skipping");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..48000)
            .map(|i| ((i as f32 * 0.0576).sin() * 12000.0) as i16)
            .collect();
        crate::testutil::write_wav(&source, 48000, 1, &samples);

        let runner = ProcessRunner::new(tools);
        let probe = MediaProbe::new(runner.clone());
        let converter = FormatConverter::new(runner);

        for format in AudioFormat::ALL {
            if !probe.supports_format(format).unwrap_or(false) {
                eprintln!("{} encoder missing, skipping", format);
                continue;
            }
            let config = match format.spec().bit_rates {
                Some(rates) => CodecConfig::lossy(format, 48000, rates[0], 1),
                None => CodecConfig::lossless(format, 48000, 1),
            };
            let dest = dir.path().join(format!("out.{}", config.extension()));
            let job = ConversionJob::new(&source, &dest, config);

            let outcome = converter.convert(&job, &CancelToken::new(), None);
            assert!(outcome.is_success(), "{format}: {outcome:?}");
            let target = probe.probe(&dest).unwrap();
            assert_eq!(target.channels, Some(1), "{format}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn real_ffmpeg_wav_to_flac() {
        let Some(tools) = crate::testutil::real_tools() else {
            eprintln!("ffmpeg not installed, skipping");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("capture.wav");
        let samples: Vec<i16> = (0..8000).map(|i| ((i % 100) * 300 - 15000) as i16).collect();
        crate::testutil::write_wav(&source, 16000, 1, &samples);

        let converter = FormatConverter::new(ProcessRunner::new(tools));
        let dest = dir.path().join("memo.flac");
        let config = CodecConfig::lossless(AudioFormat::Flac, 16000, 1).with_compression_level(5);
        let job = ConversionJob::new(&source, &dest, config);

        let outcome = converter.convert(&job, &CancelToken::new(), None);
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(dest.metadata().unwrap().len() > 0);

        // Back to PCM: lossless formats reproduce every sample.
        let decoded = dir.path().join("decoded.wav");
        let back = ConversionJob::new(&dest, &decoded, CodecConfig::lossless(AudioFormat::Wav, 16000, 1));
        let outcome = converter.convert(&back, &CancelToken::new(), None);
        assert!(outcome.is_success(), "{outcome:?}");

        let reader = hound::WavReader::open(&decoded).unwrap();
        let round_trip: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(round_trip, samples);
    }
}

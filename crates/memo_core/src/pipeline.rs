//! Recording finalization: capture to archive plus waveform.
//!
//! A [`CaptureSession`] owns the raw capture in the scratch directory for as
//! long as recording lasts. [`Finalizer::finalize`] consumes it, converts the
//! capture to the requested archival format, optionally derives a waveform
//! and then releases the capture. Dropping a session without finalizing
//! deletes the capture; a crash leaves it for
//! [`Finalizer::sweep_orphans`] on the next start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::convert::FormatConverter;
use crate::error::CoreResult;
use crate::models::{
    CodecConfig, ConversionJob, ConversionOutcome, OverwritePolicy, ProgressCallback, WaveformData,
};
use crate::process::{CancelToken, ProcessRunner};
use crate::temp::{ManagedTempFile, ScratchDirRegistry, TempResourceGuard};
use crate::waveform::{WaveformExtractor, WaveformSource};

/// Default age after which scratch files count as orphaned.
const DEFAULT_ORPHAN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_WAVEFORM_BINS: usize = 1000;

/// A raw capture tracked until finalization.
#[derive(Debug)]
pub struct CaptureSession {
    guard: TempResourceGuard,
    file: ManagedTempFile,
}

impl CaptureSession {
    /// Where the recorder should write.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file(&self) -> &ManagedTempFile {
        &self.file
    }
}

/// Waveform wanted alongside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformRequest {
    pub source: WaveformSource,
    pub bin_count: usize,
}

/// What to do with a finished capture.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeRequest {
    pub destination: PathBuf,
    pub config: CodecConfig,
    pub overwrite: OverwritePolicy,
    pub waveform: Option<WaveformRequest>,
    /// Keep the raw capture instead of deleting it.
    pub retain_capture: bool,
}

impl FinalizeRequest {
    pub fn new(destination: impl Into<PathBuf>, config: CodecConfig) -> Self {
        Self {
            destination: destination.into(),
            config,
            overwrite: OverwritePolicy::Never,
            waveform: None,
            retain_capture: false,
        }
    }

    pub fn with_overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    pub fn with_waveform(mut self, source: WaveformSource, bin_count: usize) -> Self {
        self.waveform = Some(WaveformRequest { source, bin_count });
        self
    }

    pub fn with_waveform_request(mut self, waveform: WaveformRequest) -> Self {
        self.waveform = Some(waveform);
        self
    }

    pub fn retaining_capture(mut self) -> Self {
        self.retain_capture = true;
        self
    }
}

/// Result of finalizing one capture.
#[derive(Debug)]
pub struct FinalizeReport {
    pub outcome: ConversionOutcome,
    /// Present when a waveform was requested and the conversion succeeded.
    pub waveform: Option<CoreResult<WaveformData>>,
    /// Path of the raw capture when it was retained.
    pub retained_capture: Option<PathBuf>,
}

/// Runs captures through conversion and waveform extraction.
#[derive(Debug, Clone)]
pub struct Finalizer {
    converter: FormatConverter,
    extractor: WaveformExtractor,
    scratch_dir: PathBuf,
    orphan_max_age: Duration,
    waveform_bins: usize,
}

impl Finalizer {
    pub fn new(runner: ProcessRunner, scratch_dir: impl Into<PathBuf>) -> Self {
        let scratch_dir = scratch_dir.into();
        Self {
            converter: FormatConverter::new(runner.clone())
                .with_scratch_registry(ScratchDirRegistry::in_scratch_dir(&scratch_dir)),
            extractor: WaveformExtractor::new(runner),
            scratch_dir,
            orphan_max_age: DEFAULT_ORPHAN_AGE,
            waveform_bins: DEFAULT_WAVEFORM_BINS,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            converter: FormatConverter::from_settings(settings),
            extractor: WaveformExtractor::from_settings(settings),
            scratch_dir: PathBuf::from(&settings.paths.scratch_dir),
            orphan_max_age: Duration::from_secs(settings.paths.orphan_max_age_secs),
            waveform_bins: settings.waveform.default_bins,
        }
    }

    /// Use `converter`; its partial outputs are recorded for [`sweep_orphans`](Self::sweep_orphans).
    pub fn with_converter(mut self, converter: FormatConverter) -> Self {
        self.converter = converter.with_scratch_registry(self.scratch_registry());
        self
    }

    pub fn with_extractor(mut self, extractor: WaveformExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_orphan_max_age(mut self, max_age: Duration) -> Self {
        self.orphan_max_age = max_age;
        self
    }

    pub fn converter(&self) -> &FormatConverter {
        &self.converter
    }

    pub fn extractor(&self) -> &WaveformExtractor {
        &self.extractor
    }

    /// Waveform request at the configured resolution.
    pub fn default_waveform(&self, source: WaveformSource) -> WaveformRequest {
        WaveformRequest {
            source,
            bin_count: self.waveform_bins,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn scratch_registry(&self) -> ScratchDirRegistry {
        ScratchDirRegistry::in_scratch_dir(&self.scratch_dir)
    }

    /// Remove scratch files left behind by an earlier run.
    ///
    /// Covers the scratch directory and every directory a conversion wrote
    /// partial output into. A recorded directory that cannot be swept is
    /// logged and skipped.
    pub fn sweep_orphans(&self) -> CoreResult<usize> {
        let mut removed = TempResourceGuard::sweep_orphans(&self.scratch_dir, self.orphan_max_age)?;
        for dir in self.scratch_registry().prune()? {
            match TempResourceGuard::sweep_orphans(&dir, self.orphan_max_age) {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!("Skipping sweep of {}: {}", dir.display(), e),
            }
        }
        Ok(removed)
    }

    /// Allocate a fresh capture file in the scratch directory.
    pub fn begin_capture(&self, extension: &str) -> CoreResult<CaptureSession> {
        let guard = TempResourceGuard::new(&self.scratch_dir);
        let file = guard.create("capture", extension)?;
        tracing::debug!("Capture session at {}", file.path().display());
        Ok(CaptureSession { guard, file })
    }

    /// Take ownership of a capture written somewhere by the recorder.
    pub fn adopt_capture(&self, path: impl Into<PathBuf>) -> CaptureSession {
        let guard = TempResourceGuard::new(&self.scratch_dir);
        let file = guard.register(path);
        CaptureSession { guard, file }
    }

    /// Convert the capture and release it.
    ///
    /// The capture is deleted on every path unless the request retains it.
    /// A waveform failure is reported alongside a successful conversion
    /// rather than replacing it.
    pub fn finalize(
        &self,
        session: CaptureSession,
        request: &FinalizeRequest,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> FinalizeReport {
        let CaptureSession { guard, file } = session;

        let job = ConversionJob::new(file.path(), &request.destination, request.config.clone())
            .with_overwrite(request.overwrite);
        let outcome = self.converter.convert(&job, cancel, progress);

        let waveform = match (&outcome, request.waveform) {
            (ConversionOutcome::Success { final_path, .. }, Some(wanted)) => {
                let source = match wanted.source {
                    WaveformSource::Capture => file.path(),
                    WaveformSource::Archive => final_path.as_path(),
                };
                let result = self
                    .extractor
                    .extract_with_cancel(source, wanted.bin_count, cancel);
                if let Err(e) = &result {
                    tracing::warn!("Waveform for {} failed: {}", source.display(), e);
                }
                Some(result)
            }
            _ => None,
        };

        let retained_capture = if request.retain_capture {
            Some(guard.persist(&file))
        } else {
            if let Err(e) = guard.release(&file) {
                tracing::warn!("Failed to remove capture {}: {}", file.path().display(), e);
            }
            None
        };

        FinalizeReport {
            outcome,
            waveform,
            retained_capture,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::AudioFormat;
    use crate::temp::TEMP_PREFIX;
    use crate::testutil::{fake_runner, pcm_bytes, probe_json, write_bytes};

    struct Fixture {
        dir: tempfile::TempDir,
        finalizer: Finalizer,
    }

    /// Encoder writes a stub archive; decoder streams 1 s of 8 kHz audio.
    fn fixture(encode_exit: i32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let raw = write_bytes(dir.path(), "decoded.raw", &pcm_bytes(&vec![8192i16; 8000]));
        let capture_json = write_bytes(
            dir.path(),
            "capture.json",
            probe_json("pcm_s16le", 8000, 1, Some(1.0)).as_bytes(),
        );
        let archive_json = write_bytes(
            dir.path(),
            "archive.json",
            probe_json("opus", 48000, 1, Some(1.0)).as_bytes(),
        );
        let ffmpeg = format!(
            "case \"$last\" in pipe:1) cat '{}';; *) printf 'opus-data' > \"$last\"; exit {};; esac",
            raw.display(),
            encode_exit
        );
        let ffprobe = format!(
            "case \"$last\" in *capture*) cat '{}';; *) cat '{}';; esac",
            capture_json.display(),
            archive_json.display()
        );
        let runner = fake_runner(dir.path(), &ffmpeg, &ffprobe);
        let finalizer = Finalizer::new(runner, dir.path().join("scratch"));
        Fixture { dir, finalizer }
    }

    fn opus() -> CodecConfig {
        CodecConfig::lossy(AudioFormat::Opus, 48000, 64000, 1)
    }

    fn record(session: &CaptureSession) {
        std::fs::write(session.path(), b"RIFF-raw-capture").unwrap();
    }

    fn scratch_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                name.to_string_lossy().starts_with(TEMP_PREFIX)
            })
            .count()
    }

    #[test]
    fn success_hands_off_archive_and_removes_capture() {
        crate::logging::init_test_tracing();
        let fx = fixture(0);
        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let capture = session.path().to_path_buf();
        let dest = fx.dir.path().join("memo.opus");

        let request = FinalizeRequest::new(&dest, opus()).with_waveform(WaveformSource::Capture, 10);
        let report = fx.finalizer.finalize(session, &request, &CancelToken::new(), None);

        assert!(report.outcome.is_success(), "{:?}", report.outcome);
        assert_eq!(std::fs::read(&dest).unwrap(), b"opus-data");
        assert!(!capture.exists());
        assert_eq!(scratch_files(fx.finalizer.scratch_dir()), 0);

        let waveform = report.waveform.unwrap().unwrap();
        assert_eq!(waveform.len(), 10);
        assert!((waveform.max_peak() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn archive_waveform_decodes_the_final_file() {
        let fx = fixture(0);
        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let dest = fx.dir.path().join("memo.opus");

        let wanted = fx.finalizer.default_waveform(WaveformSource::Archive);
        assert_eq!(wanted.bin_count, 1000);
        let request = FinalizeRequest::new(&dest, opus()).with_waveform_request(wanted);
        let report = fx.finalizer.finalize(session, &request, &CancelToken::new(), None);

        let waveform = report.waveform.unwrap().unwrap();
        assert_eq!(waveform.duration, Duration::from_secs(1));
        assert!(!waveform.is_empty() && waveform.len() <= 1000);
    }

    #[test]
    fn failure_still_removes_capture() {
        let fx = fixture(1);
        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let capture = session.path().to_path_buf();
        let dest = fx.dir.path().join("memo.opus");

        let request = FinalizeRequest::new(&dest, opus()).with_waveform(WaveformSource::Capture, 10);
        let report = fx.finalizer.finalize(session, &request, &CancelToken::new(), None);

        assert_eq!(report.outcome.error_kind(), Some(ErrorKind::NonZeroExit));
        assert!(report.waveform.is_none());
        assert!(!capture.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn retained_capture_survives() {
        let fx = fixture(0);
        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let dest = fx.dir.path().join("memo.opus");

        let request = FinalizeRequest::new(&dest, opus()).retaining_capture();
        let report = fx.finalizer.finalize(session, &request, &CancelToken::new(), None);

        let kept = report.retained_capture.unwrap();
        assert!(kept.exists());
        assert!(report.waveform.is_none());
    }

    #[test]
    fn abandoned_session_deletes_capture() {
        let fx = fixture(0);
        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let capture = session.path().to_path_buf();
        drop(session);
        assert!(!capture.exists());
    }

    #[test]
    fn crashed_sessions_are_swept_on_restart() {
        let fx = fixture(0);
        for _ in 0..3 {
            let session = fx.finalizer.begin_capture("wav").unwrap();
            record(&session);
            std::mem::forget(session);
        }
        let stray = fx.finalizer.scratch_dir().join("notes.txt");
        std::fs::write(&stray, b"keep").unwrap();

        let restarted = fx.finalizer.clone().with_orphan_max_age(Duration::ZERO);
        assert_eq!(restarted.sweep_orphans().unwrap(), 3);
        let left: Vec<_> = std::fs::read_dir(restarted.scratch_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(left, vec!["notes.txt".to_string()]);
        assert!(left.iter().all(|n| !n.starts_with(TEMP_PREFIX)));
    }

    #[test]
    fn crashed_conversion_partials_are_swept_on_restart() {
        let fx = fixture(0);
        let archive = fx.dir.path().join("archive");
        std::fs::create_dir(&archive).unwrap();
        let dest = archive.join("memo.opus");

        let session = fx.finalizer.begin_capture("wav").unwrap();
        record(&session);
        let report = fx
            .finalizer
            .finalize(session, &FinalizeRequest::new(&dest, opus()), &CancelToken::new(), None);
        assert!(report.outcome.is_success(), "{:?}", report.outcome);

        // A later encode into the same folder dies before its cleanup runs.
        let guard = TempResourceGuard::new(&archive);
        let partial = guard.create("memo2", "opus").unwrap();
        std::mem::forget(guard);
        assert_eq!(scratch_files(&archive), 1);

        let restarted = Finalizer::new(ProcessRunner::default(), fx.finalizer.scratch_dir())
            .with_orphan_max_age(Duration::ZERO);
        assert_eq!(restarted.sweep_orphans().unwrap(), 1);
        assert!(!partial.path().exists());
        assert!(dest.exists());
    }

    #[test]
    fn sweep_skips_recorded_folders_that_are_gone() {
        let fx = fixture(0);
        let archive = fx.dir.path().join("archive");
        std::fs::create_dir(&archive).unwrap();
        let registry = ScratchDirRegistry::in_scratch_dir(fx.finalizer.scratch_dir());
        registry.record(&archive).unwrap();
        std::fs::remove_dir(&archive).unwrap();

        let restarted = fx.finalizer.clone().with_orphan_max_age(Duration::ZERO);
        assert_eq!(restarted.sweep_orphans().unwrap(), 0);
        assert!(registry.dirs().unwrap().is_empty());
    }
}

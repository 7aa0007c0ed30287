//! Live level metering of an in-progress capture.
//!
//! This module provides:
//! - [`LevelMonitor`], which polls the flushed tail of the capture file
//! - [`LevelStream`], the sample sequence for one recording
//! - Peak/RMS helpers in [`peak_and_rms`] and [`to_dbfs`]
//!
//! The monitor only ever opens the capture read-only. A missing file or a
//! tail shorter than one frame is "not yet written", never an error.
//!
//! # Example
//!
//! ```no_run
//! use memo_core::models::PcmLayout;
//! use memo_core::monitor::{CaptureTarget, LevelMonitor};
//!
//! let monitor = LevelMonitor::new();
//! let mut stream = monitor.start(CaptureTarget::wav("capture.wav", PcmLayout::default()))?;
//! for sample in stream.by_ref().take(20) {
//!     println!("{:?} peak={:.2}", sample.timestamp, sample.peak);
//! }
//! stream.stop();
//! # Ok::<(), memo_core::CoreError>(())
//! ```

mod meter;
mod tail;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::models::LevelSample;

pub use meter::{peak_and_rms, to_dbfs, SILENCE_DBFS};
pub use tail::{CaptureContainer, CaptureTarget};

use tail::TailReader;

/// Samples buffered for a slow consumer before new ones are dropped.
const STREAM_CAPACITY: usize = 32;

/// Periodic peak/RMS reader for a growing capture.
#[derive(Debug, Clone)]
pub struct LevelMonitor {
    interval: Duration,
    window_bytes: usize,
    smoothing: f32,
}

impl Default for LevelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(50),
            window_bytes: 8192,
            smoothing: 0.3,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with_interval(Duration::from_millis(settings.monitor.interval_ms))
            .with_window_bytes(settings.monitor.window_bytes)
            .with_smoothing(settings.monitor.smoothing)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_window_bytes(mut self, window_bytes: usize) -> Self {
        self.window_bytes = window_bytes;
        self
    }

    /// Weight of the newest RMS reading in [`LevelSample::smoothed`].
    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    /// Start metering `target` on a background thread.
    pub fn start(&self, target: CaptureTarget) -> CoreResult<LevelStream> {
        if target.layout.channels == 0 {
            return Err(CoreError::invalid_config("capture layout has no channels"));
        }

        let (tx, rx) = bounded(STREAM_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));
        let reader = TailReader::new(target, self.window_bytes);

        tracing::debug!(
            "Starting level monitor on {} every {:?}",
            reader.path().display(),
            self.interval
        );

        let worker = {
            let active = Arc::clone(&active);
            let interval = self.interval;
            let smoothing = self.smoothing;
            thread::Builder::new()
                .name("level-monitor".to_string())
                .spawn(move || poll_capture(reader, tx, &active, interval, smoothing))
                .map_err(|e| CoreError::io("spawn level monitor", e))?
        };

        Ok(LevelStream {
            rx,
            active,
            worker: Some(worker),
            interval: self.interval,
        })
    }
}

/// Level samples of one recording, in timestamp order.
///
/// Iteration blocks until the next sample and ends once the stream is
/// stopped. Dropping the stream stops it.
#[derive(Debug)]
pub struct LevelStream {
    rx: Receiver<LevelSample>,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
}

impl LevelStream {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Next sample if one is ready, without blocking.
    pub fn try_next(&mut self) -> Option<LevelSample> {
        if !self.is_active() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop metering.
    ///
    /// Returns once the worker has exited; samples still queued are
    /// discarded, so nothing is yielded after this returns.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                tracing::warn!("Level monitor thread panicked");
            }
            tracing::debug!("Level monitor stopped");
        }
        while self.rx.try_recv().is_ok() {}
    }
}

impl Iterator for LevelStream {
    type Item = LevelSample;

    fn next(&mut self) -> Option<LevelSample> {
        while self.is_active() {
            match self.rx.recv_timeout(self.interval * 4) {
                Ok(sample) => return Some(sample),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }
}

impl Drop for LevelStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_capture(
    mut reader: TailReader,
    tx: Sender<LevelSample>,
    active: &AtomicBool,
    interval: Duration,
    smoothing: f32,
) {
    let started = Instant::now();
    let mut last: Option<Duration> = None;
    let mut smoothed = 0.0f32;

    while active.load(Ordering::Acquire) {
        let tick = Instant::now();

        match reader.read_tail() {
            Ok(Some(bytes)) => {
                let (peak, rms) = peak_and_rms(&bytes, reader.layout());
                smoothed += smoothing * (rms - smoothed);

                let mut timestamp = started.elapsed();
                if let Some(prev) = last {
                    if timestamp <= prev {
                        timestamp = prev + Duration::from_micros(1);
                    }
                }
                last = Some(timestamp);

                let sample = LevelSample {
                    timestamp,
                    peak,
                    rms,
                    smoothed,
                };
                if !active.load(Ordering::Acquire) {
                    break;
                }
                match tx.try_send(sample) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!("Level stream full, dropping sample");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("Skipping level reading of {}: {}", reader.path().display(), e);
            }
        }

        let spent = tick.elapsed();
        if spent < interval {
            thread::park_timeout(interval - spent);
        }
    }
}

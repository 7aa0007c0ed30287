//! Derived signal data (waveform bins, live level samples).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Amplitude envelope of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformData {
    /// Peak amplitude per bin, each in [0.0, 1.0].
    pub bins: Vec<f32>,
    /// Duration of the decoded source.
    pub duration: Duration,
    /// Set when decoding stopped early and only complete bins were kept.
    #[serde(default)]
    pub truncated: bool,
}

impl WaveformData {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Loudest bin.
    pub fn max_peak(&self) -> f32 {
        self.bins.iter().copied().fold(0.0, f32::max)
    }

    /// Quietest and loudest bins, `(0.0, 0.0)` when empty.
    pub fn peak_range(&self) -> (f32, f32) {
        if self.bins.is_empty() {
            return (0.0, 0.0);
        }
        let min = self.bins.iter().copied().fold(f32::MAX, f32::min);
        (min, self.max_peak())
    }

    /// Copy scaled so the loudest bin equals `target_max`.
    ///
    /// Silent data is returned unchanged.
    pub fn normalized(&self, target_max: f32) -> WaveformData {
        let max = self.max_peak();
        let mut out = self.clone();
        if max > 0.0 {
            let target = target_max.clamp(0.0, 1.0);
            for bin in &mut out.bins {
                *bin = (*bin / max * target).min(1.0);
            }
        }
        out
    }

    /// Time covered by one bin.
    pub fn bin_duration(&self) -> Duration {
        if self.bins.is_empty() {
            return Duration::ZERO;
        }
        self.duration / self.bins.len() as u32
    }
}

/// One live meter reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSample {
    /// Time since monitoring started.
    pub timestamp: Duration,
    /// Peak absolute amplitude in [0.0, 1.0].
    pub peak: f32,
    /// Root-mean-square amplitude in [0.0, 1.0].
    pub rms: f32,
    /// Exponentially smoothed RMS for meter display.
    pub smoothed: f32,
}

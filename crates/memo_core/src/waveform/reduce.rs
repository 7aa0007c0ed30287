//! Streaming peak reduction of interleaved s16le PCM.
//!
//! When the source length is known before decoding, window boundaries are
//! fixed up front and every frame folds straight into its own window, so
//! each bin is the exact peak of its samples in O(bins) memory.
//!
//! Without a known length, frames are folded into fixed-size blocks. When
//! the block count passes `BLOCKS_PER_BIN * bin_count`, neighbouring blocks
//! are merged pairwise and the block size doubles. Windows laid over the
//! blocks afterwards are exact only where they fall on block edges.

/// Blocks kept per requested bin before the pyramid coarsens.
const BLOCKS_PER_BIN: usize = 64;

/// Full-scale value of signed 16-bit samples.
const FULL_SCALE: f32 = 32768.0;

/// Accumulates per-frame peaks from a byte stream.
#[derive(Debug)]
pub struct PeakAccumulator {
    frame_bytes: usize,
    frames: u64,
    carry: Vec<u8>,
    fold: Fold,
}

#[derive(Debug)]
enum Fold {
    Windows(WindowFold),
    Blocks(BlockFold),
}

/// Windows fixed over a known frame count.
#[derive(Debug)]
struct WindowFold {
    total_frames: u64,
    peaks: Vec<f32>,
    index: usize,
    end: u64,
}

#[derive(Debug)]
struct BlockFold {
    max_blocks: usize,
    block_frames: u64,
    blocks: Vec<f32>,
    current: f32,
    current_frames: u64,
}

/// Result of a finished stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Peaks {
    Windows(WindowPeaks),
    Blocks(PeakPyramid),
}

/// Exact peaks of windows laid out before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPeaks {
    /// One peak per window; windows never reached stay at zero.
    pub peaks: Vec<f32>,
    /// Frame count the windows partition.
    pub total_frames: u64,
    /// Total frames received.
    pub frames: u64,
}

/// Block peaks covering every frame received.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakPyramid {
    /// Peak of each block; the last block may be short.
    pub blocks: Vec<f32>,
    /// Frames per block.
    pub block_frames: u64,
    /// Total frames received.
    pub frames: u64,
}

impl PeakAccumulator {
    /// Accumulator for a stream of unknown length.
    pub fn new(channels: u16, bin_count: usize) -> Self {
        Self::with_fold(
            channels,
            Fold::Blocks(BlockFold {
                max_blocks: BLOCKS_PER_BIN * bin_count.max(1),
                block_frames: 1,
                blocks: Vec::new(),
                current: 0.0,
                current_frames: 0,
            }),
        )
    }

    /// Accumulator with `bins` windows partitioning `total_frames`.
    ///
    /// Frames past `total_frames` fold into the last window.
    pub fn with_known_length(channels: u16, bins: usize, total_frames: u64) -> Self {
        let mut fold = WindowFold {
            total_frames,
            peaks: vec![0.0; bins],
            index: 0,
            end: 0,
        };
        fold.end = window_start(1, bins, total_frames);
        Self::with_fold(channels, Fold::Windows(fold))
    }

    fn with_fold(channels: u16, fold: Fold) -> Self {
        Self {
            frame_bytes: 2 * channels.max(1) as usize,
            frames: 0,
            carry: Vec::new(),
            fold,
        }
    }

    /// Complete frames received so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Feed raw bytes; a trailing partial frame is kept for the next chunk.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        let mut data = chunk;

        if !self.carry.is_empty() {
            let need = self.frame_bytes - self.carry.len();
            let take = need.min(data.len());
            self.carry.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.carry.len() < self.frame_bytes {
                return;
            }
            let frame = std::mem::take(&mut self.carry);
            self.push_frame(frame_peak(&frame));
        }

        let mut frames = data.chunks_exact(self.frame_bytes);
        for frame in &mut frames {
            self.push_frame(frame_peak(frame));
        }
        self.carry.extend_from_slice(frames.remainder());
    }

    fn push_frame(&mut self, peak: f32) {
        match &mut self.fold {
            Fold::Windows(fold) => fold.push(self.frames, peak),
            Fold::Blocks(fold) => fold.push(peak),
        }
        self.frames += 1;
    }

    /// Finish the stream; a trailing partial frame is discarded.
    pub fn finish(self) -> Peaks {
        match self.fold {
            Fold::Windows(fold) => Peaks::Windows(WindowPeaks {
                peaks: fold.peaks,
                total_frames: fold.total_frames,
                frames: self.frames,
            }),
            Fold::Blocks(mut fold) => {
                if fold.current_frames > 0 {
                    fold.blocks.push(fold.current);
                }
                Peaks::Blocks(PeakPyramid {
                    blocks: fold.blocks,
                    block_frames: fold.block_frames,
                    frames: self.frames,
                })
            }
        }
    }
}

impl WindowFold {
    fn push(&mut self, frame: u64, peak: f32) {
        let Some(last) = self.peaks.len().checked_sub(1) else {
            return;
        };
        while frame >= self.end && self.index < last {
            self.index += 1;
            self.end = window_start(self.index + 1, self.peaks.len(), self.total_frames);
        }
        let slot = &mut self.peaks[self.index];
        *slot = slot.max(peak);
    }
}

impl BlockFold {
    fn push(&mut self, peak: f32) {
        self.current = self.current.max(peak);
        self.current_frames += 1;

        if self.current_frames == self.block_frames {
            self.blocks.push(self.current);
            self.current = 0.0;
            self.current_frames = 0;
            if self.blocks.len() > self.max_blocks {
                self.coarsen();
            }
        }
    }

    /// Merge neighbouring blocks, doubling the block size.
    fn coarsen(&mut self) {
        let mut merged: Vec<f32> = self
            .blocks
            .chunks(2)
            .map(|pair| pair.iter().copied().fold(0.0, f32::max))
            .collect();

        // An odd trailing block becomes the partially filled current block.
        if self.blocks.len() % 2 == 1 {
            let tail = merged.pop().unwrap_or(0.0);
            self.current = self.current.max(tail);
            self.current_frames += self.block_frames;
        }
        self.blocks = merged;
        self.block_frames *= 2;
    }
}

/// First frame of window `index` when `bins` windows partition `total`.
fn window_start(index: usize, bins: usize, total: u64) -> u64 {
    if bins == 0 {
        return total;
    }
    (index as u128 * total as u128 / bins as u128) as u64
}

/// Peak absolute amplitude across the channels of one frame.
fn frame_peak(frame: &[u8]) -> f32 {
    frame
        .chunks_exact(2)
        .map(|s| (i16::from_le_bytes([s[0], s[1]]) as f32).abs() / FULL_SCALE)
        .fold(0.0, f32::max)
}

impl Peaks {
    pub fn frames(&self) -> u64 {
        match self {
            Peaks::Windows(w) => w.frames,
            Peaks::Blocks(p) => p.frames,
        }
    }
}

impl WindowPeaks {
    pub fn bins(&self) -> usize {
        self.peaks.len()
    }

    /// Windows every frame of which was received.
    pub fn complete(&self) -> Vec<f32> {
        self.windows_while(|_, end| end <= self.frames)
    }

    /// Windows that received at least one frame.
    pub fn received(&self) -> Vec<f32> {
        self.windows_while(|start, _| start < self.frames)
    }

    /// Leading windows whose `[start, end)` satisfies `keep`.
    fn windows_while(&self, keep: impl Fn(u64, u64) -> bool) -> Vec<f32> {
        let bins = self.peaks.len();
        self.peaks
            .iter()
            .enumerate()
            .take_while(|&(i, _)| {
                let start = window_start(i, bins, self.total_frames);
                let end = window_start(i + 1, bins, self.total_frames);
                keep(start, end)
            })
            .map(|(_, peak)| peak.min(1.0))
            .collect()
    }
}

impl PeakPyramid {
    /// Peak over frames `[start, end)`.
    fn peak(&self, start: u64, end: u64) -> f32 {
        if end <= start || self.blocks.is_empty() {
            return 0.0;
        }
        let first = (start / self.block_frames) as usize;
        let last = (((end - 1) / self.block_frames) as usize).min(self.blocks.len() - 1);
        self.blocks[first.min(last)..=last]
            .iter()
            .copied()
            .fold(0.0, f32::max)
    }

    /// Reduce to `bins` windows laid over a source of `total_frames`.
    ///
    /// Windows partition `total_frames` as evenly as possible. Only windows
    /// fully covered by the received frames are returned.
    pub fn reduce(&self, bins: usize, total_frames: u64) -> Vec<f32> {
        if bins == 0 || total_frames == 0 {
            return Vec::new();
        }
        (0..bins)
            .map(|i| (window_start(i, bins, total_frames), window_start(i + 1, bins, total_frames)))
            .take_while(|&(_, end)| end <= self.frames)
            .map(|(start, end)| self.peak(start, end).min(1.0))
            .collect()
    }
}

/// Number of bins for `frames` frames: never more than one per frame, and
/// never shorter than `min_window_frames` each.
pub fn bin_count_for(requested: usize, frames: u64, min_window_frames: u64) -> usize {
    let by_width = frames / min_window_frames.max(1);
    (requested as u64).min(by_width).min(frames) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn windows(peaks: Peaks) -> WindowPeaks {
        match peaks {
            Peaks::Windows(w) => w,
            Peaks::Blocks(_) => panic!("expected fixed windows"),
        }
    }

    fn pyramid(peaks: Peaks) -> PeakPyramid {
        match peaks {
            Peaks::Blocks(p) => p,
            Peaks::Windows(_) => panic!("expected a block pyramid"),
        }
    }

    #[test]
    fn peak_is_max_across_channels() {
        let mut acc = PeakAccumulator::new(2, 10);
        acc.push_bytes(&mono(&[1000, -16384, 0, 0]));
        let pyramid = pyramid(acc.finish());
        assert_eq!(pyramid.frames, 2);
        assert_eq!(pyramid.reduce(2, 2), vec![0.5, 0.0]);
    }

    #[test]
    fn frames_may_straddle_chunks() {
        let bytes = mono(&[100, -32768, 200]);
        let mut acc = PeakAccumulator::with_known_length(1, 3, 3);
        acc.push_bytes(&bytes[..3]);
        acc.push_bytes(&bytes[3..]);
        let peaks = windows(acc.finish());
        assert_eq!(peaks.frames, 3);
        assert_eq!(peaks.complete(), vec![100.0 / 32768.0, 1.0, 200.0 / 32768.0]);
    }

    #[test]
    fn transient_on_a_window_edge_stays_in_its_window() {
        // 100 001 frames over 10 windows: window 1 starts at frame 10 000.
        let mut samples = vec![0i16; 100_001];
        samples[10_000] = 16384;
        let mut acc = PeakAccumulator::with_known_length(1, 10, 100_001);
        for chunk in mono(&samples).chunks(4096) {
            acc.push_bytes(chunk);
        }
        let peaks = windows(acc.finish()).complete();

        assert_eq!(peaks.len(), 10);
        assert_eq!(peaks[0], 0.0);
        assert_eq!(peaks[1], 0.5);
        assert!(peaks[2..].iter().all(|&p| p == 0.0));
    }

    #[test]
    fn last_frame_of_a_window_stays_in_its_window() {
        let mut samples = vec![0i16; 100_001];
        samples[9_999] = -16384;
        let mut acc = PeakAccumulator::with_known_length(1, 10, 100_001);
        acc.push_bytes(&mono(&samples));
        let peaks = windows(acc.finish()).complete();
        assert_eq!(&peaks[..2], &[0.5, 0.0]);
    }

    #[test]
    fn frames_past_the_known_length_fold_into_the_last_window() {
        let mut samples = vec![0i16; 120];
        samples[110] = 16384;
        let mut acc = PeakAccumulator::with_known_length(1, 4, 100);
        acc.push_bytes(&mono(&samples));
        let peaks = windows(acc.finish());
        assert_eq!(peaks.complete(), vec![0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn short_stream_reports_complete_and_received_windows() {
        let mut acc = PeakAccumulator::with_known_length(1, 4, 400);
        acc.push_bytes(&mono(&[1000; 250]));
        let peaks = windows(acc.finish());
        // Two 100-frame windows are complete; the third is partly received.
        assert_eq!(peaks.complete().len(), 2);
        assert_eq!(peaks.received().len(), 3);
        assert_eq!(peaks.bins(), 4);
    }

    #[test]
    fn zero_windows_accept_frames() {
        let mut acc = PeakAccumulator::with_known_length(1, 0, 100);
        acc.push_bytes(&mono(&[5; 10]));
        let peaks = windows(acc.finish());
        assert_eq!(peaks.frames, 10);
        assert!(peaks.complete().is_empty());
    }

    #[test]
    fn unknown_length_stays_bounded_and_exact_on_block_edges() {
        let bins = 10;
        let mut samples = vec![0i16; 64_000];
        // One loud frame in the seventh window.
        samples[6 * 6_400 + 17] = 16384;
        let mut acc = PeakAccumulator::new(1, bins);
        for chunk in mono(&samples).chunks(4096) {
            acc.push_bytes(chunk);
        }
        let pyramid = pyramid(acc.finish());
        assert!(pyramid.blocks.len() <= BLOCKS_PER_BIN * bins + 1);

        let reduced = pyramid.reduce(bins, 64_000);
        assert_eq!(reduced.len(), bins);
        for (i, peak) in reduced.iter().enumerate() {
            let expected = if i == 6 { 0.5 } else { 0.0 };
            assert_eq!(*peak, expected, "bin {i}");
        }
    }

    #[test]
    fn incomplete_pyramid_windows_are_dropped() {
        let mut acc = PeakAccumulator::new(1, 4);
        acc.push_bytes(&mono(&[1000; 250]));
        let pyramid = pyramid(acc.finish());
        // Source should have had 400 frames: only two 100-frame windows are complete.
        assert_eq!(pyramid.reduce(4, 400).len(), 2);
    }

    #[test]
    fn bin_count_respects_frames_and_width() {
        assert_eq!(bin_count_for(100, 50, 1), 50);
        assert_eq!(bin_count_for(100, 400, 8), 50);
        assert_eq!(bin_count_for(100, 80_000, 8), 100);
        assert_eq!(bin_count_for(100, 0, 8), 0);
    }
}

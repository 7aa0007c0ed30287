//! Peak and RMS over interleaved PCM.

use crate::models::PcmLayout;

/// Floor reported for silence.
pub const SILENCE_DBFS: f32 = -60.0;

/// Peak absolute amplitude and RMS across every sample of `data`.
///
/// A trailing partial frame is ignored. Empty input reads as silence.
pub fn peak_and_rms(data: &[u8], layout: &PcmLayout) -> (f32, f32) {
    let frame_bytes = layout.frame_bytes();
    let whole = data.len() - data.len() % frame_bytes;
    let width = layout.format.bytes_per_sample();

    let mut peak = 0.0f32;
    let mut energy = 0.0f64;
    let mut count = 0usize;
    for sample in data[..whole].chunks_exact(width) {
        let value = layout.format.decode(sample);
        peak = peak.max(value.abs());
        energy += (value as f64) * (value as f64);
        count += 1;
    }

    if count == 0 {
        return (0.0, 0.0);
    }
    let rms = (energy / count as f64).sqrt() as f32;
    (peak.min(1.0), rms.min(1.0))
}

/// Linear amplitude to dBFS, floored at [`SILENCE_DBFS`].
pub fn to_dbfs(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return SILENCE_DBFS;
    }
    (20.0 * amplitude.log10()).max(SILENCE_DBFS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleFormat;

    fn s16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn square_wave_peak_equals_rms() {
        let layout = PcmLayout { sample_rate: 8000, channels: 2, format: SampleFormat::S16Le };
        let (peak, rms) = peak_and_rms(&s16(&[16384, -16384, -16384, 16384]), &layout);
        assert_eq!(peak, 0.5);
        assert!((rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn partial_frame_is_ignored() {
        let layout = PcmLayout { sample_rate: 8000, channels: 2, format: SampleFormat::S16Le };
        // One full stereo frame of silence plus half a loud frame.
        let (peak, _) = peak_and_rms(&s16(&[0, 0, 32767]), &layout);
        assert_eq!(peak, 0.0);
    }

    #[test]
    fn float_samples_are_clamped() {
        let layout = PcmLayout { sample_rate: 8000, channels: 1, format: SampleFormat::F32Le };
        let bytes: Vec<u8> = [0.25f32, -1.5].iter().flat_map(|s| s.to_le_bytes()).collect();
        let (peak, _) = peak_and_rms(&bytes, &layout);
        assert_eq!(peak, 1.0);
    }

    #[test]
    fn dbfs_floors_silence() {
        assert_eq!(to_dbfs(0.0), SILENCE_DBFS);
        assert!((to_dbfs(1.0)).abs() < 1e-6);
        assert!((to_dbfs(0.5) + 6.0206).abs() < 1e-3);
    }
}

//! Media inspection.
//!
//! [`MediaProbe`] reads duration, codec, sample rate and channel layout
//! with ffprobe and reports which encoders the installed ffmpeg offers.

mod probe;

pub use probe::MediaProbe;

//! Encoder progress parsing.
//!
//! ffmpeg reports position both through `-progress` key/value lines
//! (`out_time_us=`, `out_time=`) and through its classic status line
//! (`size= ... time=00:00:01.23 ...`). Any of them is accepted; values
//! that cannot be parsed are ignored.

use std::time::{Duration, Instant};

use crate::models::ConversionProgress;

/// Encoded position reported by one stderr line, if any.
pub fn parse_progress_time(line: &str) -> Option<Duration> {
    let line = line.trim();

    if let Some(value) = line.strip_prefix("out_time_us=") {
        return value.trim().parse::<u64>().ok().map(Duration::from_micros);
    }
    if let Some(value) = line.strip_prefix("out_time=") {
        return parse_timestamp(value.trim());
    }
    extract_value(line, "time=").and_then(|v| parse_timestamp(&v))
}

/// Value following `key` up to the next whitespace, skipping leading spaces.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_part = after_key.trim_start();
    let end = value_part
        .find(|c: char| c.is_whitespace())
        .unwrap_or(value_part.len());
    let value = &value_part[..end];
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse `HH:MM:SS.ffffff` (or plain seconds) into a duration.
fn parse_timestamp(value: &str) -> Option<Duration> {
    if value.starts_with('-') {
        return None;
    }
    let mut seconds = 0.0f64;
    for part in value.split(':') {
        let n: f64 = part.parse().ok()?;
        seconds = seconds * 60.0 + n;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Turns reported positions into monotonic progress events.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<Duration>,
    started: Instant,
    last_fraction: f64,
}

impl ProgressTracker {
    /// Track progress against the source duration, when known.
    pub fn new(total: Option<Duration>) -> Self {
        Self {
            total: total.filter(|t| !t.is_zero()),
            started: Instant::now(),
            last_fraction: 0.0,
        }
    }

    /// Event for a newly reported position, if it advances progress.
    pub fn update(&mut self, position: Duration) -> Option<ConversionProgress> {
        let total = self.total?;
        let fraction = (position.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0);
        self.advance(fraction)
    }

    /// Final event once encoding has succeeded.
    pub fn complete(&mut self) -> Option<ConversionProgress> {
        self.advance(1.0)
    }

    fn advance(&mut self, fraction: f64) -> Option<ConversionProgress> {
        if fraction <= self.last_fraction {
            return None;
        }
        self.last_fraction = fraction;
        Some(ConversionProgress {
            fraction_complete: fraction,
            elapsed: self.started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_keys() {
        assert_eq!(
            parse_progress_time("out_time_us=1500000"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_progress_time("out_time=00:01:02.500000"),
            Some(Duration::from_millis(62_500))
        );
    }

    #[test]
    fn parses_status_line() {
        let line = "size=     256kB time=00:00:05.12 bitrate= 409.6kbits/s speed=51.2x";
        assert_eq!(parse_progress_time(line), Some(Duration::from_millis(5120)));
    }

    #[test]
    fn ignores_malformed_values() {
        assert_eq!(parse_progress_time("out_time_us=N/A"), None);
        assert_eq!(parse_progress_time("out_time=-577014:32:22.771616"), None);
        assert_eq!(parse_progress_time("time="), None);
        assert_eq!(parse_progress_time("Stream mapping:"), None);
        assert_eq!(parse_progress_time("progress=continue"), None);
    }

    #[test]
    fn out_of_range_times_are_ignored() {
        assert_eq!(parse_progress_time("size=1kB time=1e30 bitrate=N/A"), None);
        assert_eq!(parse_progress_time("out_time=inf"), None);
        assert_eq!(parse_progress_time("out_time=NaN"), None);
        assert_eq!(
            parse_progress_time("time=99999999999999999:00:00.00"),
            None
        );
    }

    #[test]
    fn tracker_is_monotonic() {
        let mut tracker = ProgressTracker::new(Some(Duration::from_secs(10)));
        let first = tracker.update(Duration::from_secs(5)).unwrap();
        assert_eq!(first.fraction_complete, 0.5);
        assert!(tracker.update(Duration::from_secs(3)).is_none());
        assert!(tracker.update(Duration::from_secs(5)).is_none());
        assert_eq!(
            tracker.update(Duration::from_secs(60)).unwrap().fraction_complete,
            1.0
        );
        assert!(tracker.complete().is_none());
    }

    #[test]
    fn unknown_total_only_reports_completion() {
        let mut tracker = ProgressTracker::new(None);
        assert!(tracker.update(Duration::from_secs(1)).is_none());
        assert_eq!(tracker.complete().unwrap().fraction_complete, 1.0);
    }
}

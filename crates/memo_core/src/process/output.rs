//! Incremental line splitting and bounded stderr tail.

use std::collections::VecDeque;

/// Splits a byte stream into text lines as chunks arrive.
///
/// Both `\n` and `\r` terminate a line, since ffmpeg rewrites its status
/// line in place with carriage returns. Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush the unterminated remainder (at end of stream).
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

/// Bounded buffer of the most recent output lines.
///
/// Used to attach a stderr tail to failures.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    /// Create a tail keeping at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Current contents, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Last `count` lines that are not progress key/value chatter, joined.
    pub fn diagnostic(&self, count: usize) -> String {
        let mut picked: Vec<&str> = self
            .lines
            .iter()
            .rev()
            .map(|l| l.as_str())
            .filter(|l| !is_progress_chatter(l))
            .take(count)
            .collect();
        picked.reverse();
        picked.join(" | ")
    }

    /// Check if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// `-progress` output is `key=value` with no spaces; it never explains a failure.
fn is_progress_chatter(line: &str) -> bool {
    match line.split_once('=') {
        Some((key, _)) => !key.is_empty() && !key.contains(' ') && !line.contains(": "),
        None => false,
    }
}

//! Reading the flushed tail of a capture that is still being written.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::PcmLayout;

/// Canonical header size of a plain PCM WAV file.
const CANONICAL_WAV_HEADER: u64 = 44;

/// Bytes scanned for the `data` chunk before assuming a canonical header.
const HEADER_SCAN_LIMIT: usize = 4096;

/// How the capture file frames its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureContainer {
    /// RIFF/WAVE with a header before the samples.
    #[default]
    Wav,
    /// Bare interleaved samples from byte 0.
    Raw,
}

/// The in-progress recording a monitor reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub path: PathBuf,
    pub layout: PcmLayout,
    #[serde(default)]
    pub container: CaptureContainer,
}

impl CaptureTarget {
    pub fn wav(path: impl Into<PathBuf>, layout: PcmLayout) -> Self {
        Self {
            path: path.into(),
            layout,
            container: CaptureContainer::Wav,
        }
    }

    pub fn raw(path: impl Into<PathBuf>, layout: PcmLayout) -> Self {
        Self {
            path: path.into(),
            layout,
            container: CaptureContainer::Raw,
        }
    }
}

enum HeaderScan {
    Found(u64),
    Incomplete,
    NotRiff,
}

/// Reads the last whole frames of a growing capture.
///
/// The file is reopened read-only on every call and never locked, so the
/// recorder can keep appending.
#[derive(Debug)]
pub(crate) struct TailReader {
    target: CaptureTarget,
    window_bytes: usize,
    data_offset: Option<u64>,
}

impl TailReader {
    pub(crate) fn new(target: CaptureTarget, window_bytes: usize) -> Self {
        let data_offset = match target.container {
            CaptureContainer::Raw => Some(0),
            CaptureContainer::Wav => None,
        };
        Self {
            target,
            window_bytes,
            data_offset,
        }
    }

    pub(crate) fn layout(&self) -> &PcmLayout {
        &self.target.layout
    }

    pub(crate) fn path(&self) -> &Path {
        &self.target.path
    }

    /// Latest window of samples, or `None` when not enough has been flushed.
    ///
    /// A missing file counts as not yet written.
    pub(crate) fn read_tail(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut file = match File::open(&self.target.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();

        let offset = match self.data_offset {
            Some(offset) => offset,
            None => match self.locate_data(&mut file, len)? {
                Some(offset) => offset,
                None => return Ok(None),
            },
        };

        let frame = self.target.layout.frame_bytes() as u64;
        let available = len.saturating_sub(offset);
        let available = available - available % frame;
        let window = (self.window_bytes as u64).max(frame);
        let take = available.min(window - window % frame);
        if take == 0 {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(offset + available - take))?;
        let mut buf = vec![0u8; take as usize];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf)),
            // Truncated between stat and read.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn locate_data(&mut self, file: &mut File, len: u64) -> io::Result<Option<u64>> {
        let mut header = Vec::with_capacity(HEADER_SCAN_LIMIT);
        file.by_ref()
            .take(HEADER_SCAN_LIMIT as u64)
            .read_to_end(&mut header)?;

        let offset = match scan_header(&header) {
            HeaderScan::Found(offset) => offset,
            HeaderScan::NotRiff => CANONICAL_WAV_HEADER,
            HeaderScan::Incomplete if header.len() >= HEADER_SCAN_LIMIT => CANONICAL_WAV_HEADER,
            HeaderScan::Incomplete => return Ok(None),
        };
        if len < offset {
            return Ok(None);
        }
        tracing::debug!(
            "Capture {} samples start at byte {}",
            self.target.path.display(),
            offset
        );
        self.data_offset = Some(offset);
        Ok(Some(offset))
    }
}

/// Walk RIFF chunks to the start of the `data` payload.
///
/// Chunk sizes written by a live recorder are often placeholders, so only
/// the chunks before `data` are trusted.
fn scan_header(header: &[u8]) -> HeaderScan {
    if header.len() < 12 {
        return HeaderScan::Incomplete;
    }
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return HeaderScan::NotRiff;
    }

    let mut pos = 12usize;
    while pos + 8 <= header.len() {
        let id = &header[pos..pos + 4];
        let size = u32::from_le_bytes([
            header[pos + 4],
            header[pos + 5],
            header[pos + 6],
            header[pos + 7],
        ]) as usize;
        if id == b"data" {
            return HeaderScan::Found((pos + 8) as u64);
        }
        pos = pos.saturating_add(8).saturating_add(size).saturating_add(size & 1);
    }
    HeaderScan::Incomplete
}

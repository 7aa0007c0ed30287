//! In-memory waveform cache keyed on source file identity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::models::WaveformData;

use super::WaveformExtractor;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    modified: SystemTime,
    bins: usize,
}

/// Extracted waveforms, reused until the source file changes.
///
/// Entries are keyed on path, modification time and bin count, so a
/// rewritten file misses instead of serving stale data. Truncated
/// results are never stored.
#[derive(Debug, Default)]
pub struct WaveformCache {
    entries: Mutex<HashMap<CacheKey, Arc<WaveformData>>>,
}

impl WaveformCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached waveform for `path`, extracting it on a miss.
    ///
    /// The lock is not held while decoding; two callers racing on the same
    /// miss both extract and the later insert wins.
    pub fn get_or_extract(
        &self,
        extractor: &WaveformExtractor,
        path: &Path,
        bin_count: usize,
    ) -> CoreResult<Arc<WaveformData>> {
        let key = cache_key(path, bin_count)?;
        if let Some(hit) = self.entries.lock().get(&key) {
            tracing::debug!("Waveform cache hit for {}", path.display());
            return Ok(Arc::clone(hit));
        }

        let data = Arc::new(extractor.extract(path, bin_count)?);
        if !data.truncated {
            let mut entries = self.entries.lock();
            entries.retain(|k, _| k.path != key.path || k.modified == key.modified);
            entries.insert(key, Arc::clone(&data));
        }
        Ok(data)
    }

    /// Drop every entry for `path`; returns how many were removed.
    pub fn invalidate(&self, path: &Path) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| k.path != path);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn cache_key(path: &Path, bins: usize) -> CoreResult<CacheKey> {
    let meta = std::fs::metadata(path)
        .map_err(|e| CoreError::unreadable(path, format!("cannot stat: {}", e)))?;
    let modified = meta
        .modified()
        .map_err(|e| CoreError::io(format!("read mtime of {}", path.display()), e))?;
    Ok(CacheKey {
        path: path.to_path_buf(),
        modified,
        bins,
    })
}

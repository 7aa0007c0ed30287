//! Exclusive claims on destination paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};

/// Set of destination paths currently being written.
///
/// Clones share the same set, so every converter built from one
/// `DestinationClaims` sees every other's jobs.
#[derive(Debug, Clone, Default)]
pub struct DestinationClaims {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Claim on one destination; released on drop.
#[derive(Debug)]
pub struct DestinationClaim {
    key: PathBuf,
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`, failing if another job holds it.
    pub fn claim(&self, path: &Path) -> CoreResult<DestinationClaim> {
        let key = claim_key(path);
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return Err(CoreError::conflict(path, "another conversion is writing it"));
        }
        Ok(DestinationClaim {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.held.lock().contains(&claim_key(path))
    }
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}

/// Spellings of the same file (`a/./b.mp3`, symlinked parents) share a key.
fn claim_key(path: &Path) -> PathBuf {
    let file_name = path.file_name();
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match (parent.canonicalize(), file_name) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

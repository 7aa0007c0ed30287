//! Scratch file tracking with guaranteed cleanup.
//!
//! A [`TempResourceGuard`] owns every scratch file registered with it and
//! deletes whatever is still tracked when it is dropped. Files that must
//! outlive the guard are handed off with [`TempResourceGuard::persist`].
//! Scratch files created by the guard carry the [`TEMP_PREFIX`] so a later
//! run can sweep leftovers from a crash. Directories outside the scratch
//! directory that receive scratch files are listed in a
//! [`ScratchDirRegistry`] so that sweep can find them too.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// File-name prefix of every scratch file the guard creates.
pub const TEMP_PREFIX: &str = "memo-tmp-";

/// Registry file kept in the scratch directory.
pub const SCRATCH_DIRS_FILE: &str = "scratch-dirs.json";

/// Attempts made to find an unused scratch name.
const CREATE_ATTEMPTS: u32 = 16;

/// A scratch file tracked by a guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedTempFile {
    id: u64,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl ManagedTempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Owner of scratch files in one directory.
#[derive(Debug)]
pub struct TempResourceGuard {
    dir: PathBuf,
    entries: Mutex<HashMap<u64, PathBuf>>,
    next_id: AtomicU64,
}

impl TempResourceGuard {
    /// Guard for scratch files created under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Scratch directory for [`create`](Self::create).
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start tracking an existing path.
    pub fn register(&self, path: impl Into<PathBuf>) -> ManagedTempFile {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.track(id, path.into())
    }

    fn track(&self, id: u64, path: PathBuf) -> ManagedTempFile {
        self.entries.lock().insert(id, path.clone());
        tracing::trace!("Tracking scratch file {}", path.display());
        ManagedTempFile {
            id,
            path,
            created_at: Utc::now(),
        }
    }

    /// Create an empty, uniquely named scratch file and track it.
    ///
    /// The name is `memo-tmp-{stem}-{pid}-{n}.{extension}`, where `n` is the
    /// id of the returned handle; the extension is kept so tools that infer
    /// the format from it still work.
    pub fn create(&self, stem: &str, extension: &str) -> CoreResult<ManagedTempFile> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| CoreError::io(format!("create {}", self.dir.display()), e))?;

        let pid = std::process::id();
        for _ in 0..CREATE_ATTEMPTS {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut name = format!("{}{}-{}-{}", TEMP_PREFIX, sanitize(stem), pid, n);
            if !extension.is_empty() {
                name.push('.');
                name.push_str(extension);
            }
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(self.track(n, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(CoreError::io(format!("create {}", path.display()), e));
                }
            }
        }

        Err(CoreError::io(
            format!("create scratch file in {}", self.dir.display()),
            io::Error::new(io::ErrorKind::AlreadyExists, "no unused scratch name"),
        ))
    }

    /// Delete a tracked file. Releasing twice is a no-op.
    pub fn release(&self, file: &ManagedTempFile) -> CoreResult<()> {
        let Some(path) = self.entries.lock().remove(&file.id) else {
            return Ok(());
        };
        remove_quietly(&path)
    }

    /// Stop tracking a file without deleting it.
    pub fn persist(&self, file: &ManagedTempFile) -> PathBuf {
        self.entries.lock().remove(&file.id);
        file.path.clone()
    }

    /// Delete every tracked file.
    ///
    /// Failures are logged; every file is attempted and the first error returned.
    pub fn release_all(&self) -> CoreResult<()> {
        let paths: Vec<PathBuf> = self.entries.lock().drain().map(|(_, p)| p).collect();
        let mut first_err = None;
        for path in paths {
            if let Err(e) = remove_quietly(&path) {
                tracing::warn!("{}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check if a file is still tracked.
    pub fn is_tracked(&self, file: &ManagedTempFile) -> bool {
        self.entries.lock().contains_key(&file.id)
    }

    /// Number of files currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Remove prefixed scratch files in `dir` at least `max_age` old.
    ///
    /// Returns the number of files removed. A missing directory sweeps nothing.
    pub fn sweep_orphans(dir: &Path, max_age: Duration) -> CoreResult<usize> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CoreError::io(format!("read {}", dir.display()), e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Swept {} orphaned scratch file(s) from {}", removed, dir.display());
        }
        Ok(removed)
    }
}

impl Drop for TempResourceGuard {
    fn drop(&mut self) {
        let _ = self.release_all();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    dirs: Vec<PathBuf>,
}

/// Directories outside the scratch directory that hold scratch files.
///
/// A directory is recorded before the first scratch file is created in it,
/// so a sweep after a crash knows every place to look. Clones share one
/// lock; the file itself is replaced atomically.
#[derive(Debug, Clone)]
pub struct ScratchDirRegistry {
    file: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ScratchDirRegistry {
    /// Registry stored as [`SCRATCH_DIRS_FILE`] inside `scratch_dir`.
    pub fn in_scratch_dir(scratch_dir: &Path) -> Self {
        Self {
            file: scratch_dir.join(SCRATCH_DIRS_FILE),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Remember `dir`. The scratch directory itself and known entries are skipped.
    pub fn record(&self, dir: &Path) -> CoreResult<()> {
        let dir = absolute(dir);
        if self.file.parent().map(absolute).as_deref() == Some(dir.as_path()) {
            return Ok(());
        }

        let _held = self.lock.lock();
        let mut registry = self.load()?;
        if registry.dirs.contains(&dir) {
            return Ok(());
        }
        tracing::debug!("Recording scratch directory {}", dir.display());
        registry.dirs.push(dir);
        self.store(&registry)
    }

    /// Recorded directories.
    pub fn dirs(&self) -> CoreResult<Vec<PathBuf>> {
        let _held = self.lock.lock();
        Ok(self.load()?.dirs)
    }

    /// Forget directories that no longer exist and return the rest.
    pub fn prune(&self) -> CoreResult<Vec<PathBuf>> {
        let _held = self.lock.lock();
        let mut registry = self.load()?;
        let before = registry.dirs.len();
        registry.dirs.retain(|d| d.is_dir());
        if registry.dirs.len() != before {
            self.store(&registry)?;
        }
        Ok(registry.dirs)
    }

    fn load(&self) -> CoreResult<RegistryFile> {
        match fs::read_to_string(&self.file) {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable {}: {}", self.file.display(), e);
                RegistryFile::default()
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(CoreError::io(format!("read {}", self.file.display()), e)),
        }
    }

    fn store(&self, registry: &RegistryFile) -> CoreResult<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CoreError::io(format!("create {}", parent.display()), e))?;
        }
        let json = serde_json::to_string_pretty(registry)
            .map_err(|e| CoreError::io("encode scratch directory list", io::Error::from(e)))?;

        let staged = self.file.with_extension("json.tmp");
        fs::write(&staged, json)
            .map_err(|e| CoreError::io(format!("write {}", staged.display()), e))?;
        fs::rename(&staged, &self.file)
            .map_err(|e| CoreError::io(format!("replace {}", self.file.display()), e))
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn remove_quietly(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::trace!("Removed scratch file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(format!("remove {}", path.display()), e)),
    }
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

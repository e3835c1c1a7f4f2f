//! Snapshot capture, restore and retention.

use crate::atomic::{durable_remove, is_missing, write_durable};
use crate::path::resolve_in_workspace;
use crate::{ContentHash, FileSnapshot, ObjectStore, Result, SnapshotError, SnapshotState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of a sweep over the object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub objects_examined: usize,
    pub objects_deleted: usize,
}

/// Captures workspace files into the object store and writes them back.
///
/// Every captured snapshot holds one reference on its content hash until it
/// is released. An object whose count drops to zero is deleted.
#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    objects: ObjectStore,
    refs: Mutex<HashMap<ContentHash, usize>>,
}

impl SnapshotStore {
    /// Create a store for the workspace at `root`, keeping content under
    /// `objects_dir`.
    pub fn new(root: impl Into<PathBuf>, objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            objects: ObjectStore::new(objects_dir),
            refs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Record the current state of `path`. Never modifies the file.
    pub fn capture(&self, path: &Path) -> Result<FileSnapshot> {
        let (relative, absolute) = resolve_in_workspace(&self.root, path)?;

        let state = match read_regular_file(&absolute)? {
            Some(bytes) => {
                let hash = self.objects.put(&bytes)?;
                self.retain_hash(&hash);
                SnapshotState::Present {
                    hash,
                    len: bytes.len() as u64,
                }
            }
            None => SnapshotState::Absent,
        };

        debug!(path = %relative.display(), existed = matches!(state, SnapshotState::Present { .. }), "captured snapshot");
        Ok(FileSnapshot::new(relative, state))
    }

    /// Write the snapshot's content back to its path, or delete the path if
    /// the snapshot records absence.
    ///
    /// Idempotent: a path already in the captured state is left untouched.
    pub fn restore(&self, snapshot: &FileSnapshot) -> Result<()> {
        let (relative, absolute) = resolve_in_workspace(&self.root, snapshot.path())?;

        match snapshot.state() {
            SnapshotState::Present { hash, .. } => {
                if self.live_hash(&absolute)?.as_ref() == Some(hash) {
                    debug!(path = %relative.display(), "restore skipped, content unchanged");
                    return Ok(());
                }
                let bytes = self.objects.get(hash)?;
                write_durable(&absolute, &bytes).map_err(|e| SnapshotError::io(&absolute, e))?;
            }
            SnapshotState::Absent => {
                if let Ok(meta) = fs::symlink_metadata(&absolute)
                    && meta.is_dir()
                {
                    return Err(SnapshotError::NotAFile(relative));
                }
                durable_remove(&absolute).map_err(|e| SnapshotError::io(&absolute, e))?;
            }
        }

        debug!(path = %relative.display(), "restored snapshot");
        Ok(())
    }

    /// Hash of the file currently at `path`, `None` when nothing exists.
    pub fn current_hash(&self, path: &Path) -> Result<Option<ContentHash>> {
        let (_, absolute) = resolve_in_workspace(&self.root, path)?;
        self.live_hash(&absolute)
    }

    /// Take an additional reference on the snapshot's content.
    ///
    /// Used when rebuilding counts from the transaction log.
    pub fn retain(&self, snapshot: &FileSnapshot) {
        if let Some(hash) = snapshot.content_hash() {
            self.retain_hash(hash);
        }
    }

    /// Drop one reference on the snapshot's content, deleting the object
    /// once nothing references it.
    pub fn release(&self, snapshot: &FileSnapshot) -> Result<()> {
        let Some(hash) = snapshot.content_hash() else {
            return Ok(());
        };

        let orphaned = {
            let mut refs = self.refs.lock();
            match refs.get_mut(hash) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    refs.remove(hash);
                    true
                }
                None => {
                    warn!(object = hash.short(), "released an object with no references");
                    false
                }
            }
        };

        if orphaned {
            self.objects.remove(hash)?;
        }
        Ok(())
    }

    /// Current reference count for `hash`.
    pub fn ref_count(&self, hash: &ContentHash) -> usize {
        self.refs.lock().get(hash).copied().unwrap_or(0)
    }

    /// Delete every stored object that holds no reference.
    ///
    /// Objects left behind by an interrupted transaction are reclaimed here.
    pub fn sweep(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let live = self.refs.lock().clone();

        for hash in self.objects.list()? {
            stats.objects_examined += 1;
            if !live.contains_key(&hash) {
                self.objects.remove(&hash)?;
                stats.objects_deleted += 1;
            }
        }

        if stats.objects_deleted > 0 {
            info!(
                examined = stats.objects_examined,
                deleted = stats.objects_deleted,
                "swept unreferenced snapshot objects"
            );
        }
        Ok(stats)
    }

    fn retain_hash(&self, hash: &ContentHash) {
        *self.refs.lock().entry(hash.clone()).or_insert(0) += 1;
    }

    fn live_hash(&self, absolute: &Path) -> Result<Option<ContentHash>> {
        Ok(read_regular_file(absolute)?.map(|bytes| ContentHash::of(&bytes)))
    }
}

/// Read a regular file. `Ok(None)` means nothing exists at the path.
fn read_regular_file(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {}
        Ok(_) => return Err(SnapshotError::NotAFile(path.to_path_buf())),
        Err(e) if is_missing(&e) => return Ok(None),
        Err(e) => return Err(SnapshotError::io(path, e)),
    }

    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if is_missing(&e) => Ok(None),
        Err(e) => Err(SnapshotError::io(path, e)),
    }
}

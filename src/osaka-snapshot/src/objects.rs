//! Content-addressed object storage.

use crate::atomic::{durable_remove, write_durable};
use crate::{ContentHash, Result, SnapshotError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flat content-addressed store: one file per distinct content.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `bytes` and return their hash. Storing content that is already
    /// present is a no-op.
    pub fn put(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(bytes);
        let path = self.object_path(&hash);
        if !path.exists() {
            write_durable(&path, bytes).map_err(|e| SnapshotError::io(&path, e))?;
            debug!(object = hash.short(), bytes = bytes.len(), "stored object");
        }
        Ok(hash)
    }

    /// Load an object, verifying it still hashes to its key.
    pub fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::MissingObject(hash.clone()));
            }
            Err(e) => return Err(SnapshotError::io(&path, e)),
        };

        let actual = ContentHash::of(&bytes);
        if &actual != hash {
            return Err(SnapshotError::CorruptObject {
                expected: hash.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).is_file()
    }

    /// Delete an object. Deleting an absent object is not an error.
    pub fn remove(&self, hash: &ContentHash) -> Result<()> {
        let path = self.object_path(hash);
        durable_remove(&path).map_err(|e| SnapshotError::io(&path, e))?;
        debug!(object = hash.short(), "removed object");
        Ok(())
    }

    /// Every object currently on disk. Stray files are skipped.
    pub fn list(&self) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        if !self.dir.exists() {
            return Ok(hashes);
        }

        let fanout = fs::read_dir(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;
        for bucket in fanout.flatten() {
            let bucket_path = bucket.path();
            if !bucket_path.is_dir() {
                continue;
            }
            let prefix = bucket.file_name().to_string_lossy().to_string();
            let entries =
                fs::read_dir(&bucket_path).map_err(|e| SnapshotError::io(&bucket_path, e))?;
            for entry in entries.flatten() {
                let rest = entry.file_name().to_string_lossy().to_string();
                if let Some(hash) = ContentHash::parse(&format!("{prefix}{rest}")) {
                    hashes.push(hash);
                }
            }
        }

        hashes.sort();
        Ok(hashes)
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let digest = hash.as_str();
        self.dir.join(&digest[..2]).join(&digest[2..])
    }
}

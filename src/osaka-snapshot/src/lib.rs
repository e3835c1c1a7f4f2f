//! Content-addressed file snapshots for the Osaka edit engine.
//!
//! A [`FileSnapshot`] records the pre-change state of one file inside the
//! workspace: either its exact bytes (stored once per distinct content in
//! the [`ObjectStore`]) or the fact that it did not exist. The
//! [`SnapshotStore`] captures and restores those states and keeps a
//! reference count per content hash so objects are reclaimed as soon as no
//! transaction or undo entry needs them.
//!
//! # Layout
//!
//! ```text
//! <state_dir>/objects/
//!     ab/
//!         cdef0123...   (sha256 of the content, first byte as fan-out dir)
//! ```

pub mod atomic;
pub mod hash;
pub mod objects;
pub mod path;
pub mod snapshot;
pub mod store;

pub use atomic::{durable_remove, is_missing, write_durable};
pub use hash::ContentHash;
pub use objects::ObjectStore;
pub use path::{PathError, resolve_in_workspace};
pub use snapshot::{FileSnapshot, SnapshotState};
pub use store::{SnapshotStore, SweepStats};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while capturing, storing or restoring snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A filesystem operation failed for the given path.
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The object backing a snapshot is missing from the store.
    #[error("snapshot object {0} is missing from the object store")]
    MissingObject(ContentHash),

    /// The stored object no longer hashes to its key.
    #[error("snapshot object {expected} is corrupt (content hashes to {actual})")]
    CorruptObject {
        expected: ContentHash,
        actual: ContentHash,
    },

    /// The target exists but is not a regular file.
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    /// The target path is not confined to the workspace.
    #[error(transparent)]
    Path(#[from] PathError),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Path this error refers to, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Io { path, .. } | Self::NotAFile(path) => Some(path),
            Self::Path(err) => Some(err.path()),
            Self::MissingObject(_) | Self::CorruptObject { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

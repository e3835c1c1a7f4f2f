//! Immutable pre-change file state.

use crate::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a file looked like when it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotState {
    /// The file existed with this content.
    Present { hash: ContentHash, len: u64 },
    /// Nothing existed at the path.
    Absent,
}

/// Capture of one workspace file, used for rollback and undo.
///
/// The content itself lives in the object store under `hash`; the snapshot
/// only holds the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    path: PathBuf,
    #[serde(flatten)]
    state: SnapshotState,
    captured_at: DateTime<Utc>,
}

impl FileSnapshot {
    pub(crate) fn new(path: PathBuf, state: SnapshotState) -> Self {
        Self {
            path,
            state,
            captured_at: Utc::now(),
        }
    }

    /// Workspace-relative path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &SnapshotState {
        &self.state
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Hash of the captured content, `None` when the file did not exist.
    pub fn content_hash(&self) -> Option<&ContentHash> {
        match &self.state {
            SnapshotState::Present { hash, .. } => Some(hash),
            SnapshotState::Absent => None,
        }
    }

    pub fn existed(&self) -> bool {
        matches!(self.state, SnapshotState::Present { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serde_shape() {
        let snapshot = FileSnapshot::new(
            PathBuf::from("a.txt"),
            SnapshotState::Present {
                hash: ContentHash::of(b"a"),
                len: 1,
            },
        );

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["path"], "a.txt");
        assert_eq!(value["state"], "present");
        assert_eq!(value["len"], 1);

        let back: FileSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_absent_has_no_hash() {
        let snapshot = FileSnapshot::new(PathBuf::from("new.txt"), SnapshotState::Absent);
        assert!(!snapshot.existed());
        assert!(snapshot.content_hash().is_none());
    }
}

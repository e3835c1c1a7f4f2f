//! Transactions: an atomic group of file changes and the snapshots that
//! undo them.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use osaka_apply_patch::{AppliedResult, PatchKind};
use osaka_snapshot::{ContentHash, FileSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Monotonic transaction sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a transaction. Moves only from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Committed) | (Self::Pending, Self::RolledBack)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// What produced a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Origin {
    /// An edit request from the planner.
    Edit,
    /// Side effects of a shell command on tracked paths.
    Command { command: String },
}

/// Summary of one file change, as kept in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: PathBuf,
    pub operation: PatchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<ContentHash>,
}

impl ChangeRecord {
    /// Derive the change from before/after hashes. `None` when nothing
    /// changed.
    pub fn between(
        path: impl Into<PathBuf>,
        prior_hash: Option<ContentHash>,
        new_hash: Option<ContentHash>,
    ) -> Option<Self> {
        let operation = match (&prior_hash, &new_hash) {
            (None, None) => return None,
            (Some(before), Some(after)) if before == after => return None,
            (None, Some(_)) => PatchKind::Create,
            (Some(_), Some(_)) => PatchKind::Modify,
            (Some(_), None) => PatchKind::Delete,
        };
        Some(Self {
            path: path.into(),
            operation,
            prior_hash,
            new_hash,
        })
    }
}

impl From<&AppliedResult> for ChangeRecord {
    fn from(result: &AppliedResult) -> Self {
        Self {
            path: result.path.clone(),
            operation: result.operation,
            prior_hash: result.prior_hash.clone(),
            new_hash: result.new_hash.clone(),
        }
    }
}

/// One atomic group of changes.
///
/// A transaction owns its snapshots: they are captured together with it and
/// released when it is rolled back, reverted or pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    origin: Origin,
    status: TransactionStatus,
    timestamp: DateTime<Utc>,
    changes: Vec<ChangeRecord>,
    snapshots: Vec<FileSnapshot>,
}

impl Transaction {
    pub fn new(id: TransactionId, origin: Origin) -> Self {
        Self {
            id,
            origin,
            status: TransactionStatus::Pending,
            timestamp: Utc::now(),
            changes: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    /// Pre-change state of every touched path, in capture order.
    pub fn snapshots(&self) -> &[FileSnapshot] {
        &self.snapshots
    }

    /// Touched paths, in capture order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.snapshots.iter().map(|s| s.path().to_path_buf()).collect()
    }

    pub fn touches(&self, path: &Path) -> bool {
        self.snapshots.iter().any(|s| s.path() == path)
    }

    pub(crate) fn push_snapshot(&mut self, snapshot: FileSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub(crate) fn push_change(&mut self, change: ChangeRecord) {
        self.changes.push(change);
    }

    /// Keep only snapshots matching `keep`, returning the rest.
    pub(crate) fn split_off_snapshots(
        &mut self,
        keep: impl Fn(&FileSnapshot) -> bool,
    ) -> Vec<FileSnapshot> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.snapshots)
            .into_iter()
            .partition(|s| keep(s));
        self.snapshots = kept;
        dropped
    }

    pub(crate) fn mark(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            timestamp: self.timestamp,
            origin: self.origin.clone(),
            paths: self.paths(),
        }
    }
}

/// Public view of an undo entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
    pub paths: Vec<PathBuf>,
}

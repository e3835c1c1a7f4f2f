//! Error types for the Osaka engine.

use crate::command::ExecError;
use crate::transaction::{TransactionId, TransactionStatus};
use osaka_apply_patch::PatchError;
use osaka_execpolicy::{CommandVerdict, PolicyError};
use osaka_snapshot::{PathError, SnapshotError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Flat classification of every engine failure.
///
/// This is what the conversation layer switches on; the error itself
/// carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PreconditionMismatch,
    PathStateConflict,
    ConflictingPatches,
    InvalidPatch,
    IoFailure,
    Unrecoverable,
    TransactionInProgress,
    NothingToUndo,
    PartialRevertFailure,
    UnsafeCommandRejected,
    CommandFailed,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreconditionMismatch => "precondition_mismatch",
            Self::PathStateConflict => "path_state_conflict",
            Self::ConflictingPatches => "conflicting_patches",
            Self::InvalidPatch => "invalid_patch",
            Self::IoFailure => "io_failure",
            Self::Unrecoverable => "unrecoverable",
            Self::TransactionInProgress => "transaction_in_progress",
            Self::NothingToUndo => "nothing_to_undo",
            Self::PartialRevertFailure => "partial_revert_failure",
            Self::UnsafeCommandRejected => "unsafe_command_rejected",
            Self::CommandFailed => "command_failed",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // Validation errors: raised before anything is written.
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("patches #{first} and #{second} both target {}", path.display())]
    ConflictingPatches {
        path: PathBuf,
        first: usize,
        second: usize,
    },

    #[error("{} is reserved for engine state", path.display())]
    ReservedPath { path: PathBuf },

    #[error("transaction contains no patches")]
    EmptyTransaction,

    // Concurrency and history
    #[error("another transaction is still in progress{}", fmt_holder(.id))]
    TransactionInProgress { id: Option<TransactionId> },

    #[error("nothing to undo")]
    NothingToUndo,

    #[error(
        "revert of transaction {id} failed at {}: {source}; {} path(s) still hold the post-change state: {}",
        failed.display(),
        unreverted.len(),
        join_paths(unreverted)
    )]
    PartialRevertFailure {
        id: TransactionId,
        reverted: Vec<PathBuf>,
        failed: PathBuf,
        /// The failed path and every path after it that was not attempted.
        unreverted: Vec<PathBuf>,
        #[source]
        source: SnapshotError,
    },

    // I/O
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transaction log {} is corrupt at line {line}: {message}", path.display())]
    CorruptLog {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(
        "rollback of transaction {id} failed after: {cause}; manual repair needed for: {}",
        join_paths(indeterminate)
    )]
    Unrecoverable {
        id: TransactionId,
        cause: Box<EngineError>,
        /// Paths whose content is neither the pre- nor the post-change state.
        indeterminate: Vec<PathBuf>,
        #[source]
        rollback: SnapshotError,
    },

    // Commands
    #[error("command rejected as {}: {}", verdict.classification, verdict.reason)]
    UnsafeCommandRejected { verdict: CommandVerdict },

    #[error("command `{command}` failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: ExecError,
    },

    #[error("transaction {id} was cancelled while its command ran")]
    Cancelled { id: TransactionId },

    // Configuration
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("configuration error: {0}")]
    Config(String),

    // Internal
    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

fn fmt_holder(id: &Option<TransactionId>) -> String {
    id.map(|id| format!(" ({id})")).unwrap_or_default()
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<PathError> for EngineError {
    fn from(err: PathError) -> Self {
        Self::Patch(PatchError::PathOutsideWorkspace(err))
    }
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Flat kind for the conversation layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Patch(err) => match err {
                PatchError::PreconditionMismatch { .. } => ErrorKind::PreconditionMismatch,
                PatchError::PathStateConflict { .. } | PatchError::PathOutsideWorkspace(_) => {
                    ErrorKind::PathStateConflict
                }
                PatchError::InvalidPatch { .. } | PatchError::Parse { .. } => {
                    ErrorKind::InvalidPatch
                }
                PatchError::ReadError { .. } | PatchError::WriteError { .. } => {
                    ErrorKind::IoFailure
                }
            },
            Self::ConflictingPatches { .. } => ErrorKind::ConflictingPatches,
            Self::ReservedPath { .. } => ErrorKind::PathStateConflict,
            Self::EmptyTransaction => ErrorKind::InvalidPatch,
            Self::TransactionInProgress { .. } => ErrorKind::TransactionInProgress,
            Self::NothingToUndo => ErrorKind::NothingToUndo,
            Self::PartialRevertFailure { .. } => ErrorKind::PartialRevertFailure,
            Self::Snapshot(SnapshotError::Path(_) | SnapshotError::NotAFile(_)) => {
                ErrorKind::PathStateConflict
            }
            Self::Snapshot(_) | Self::Io { .. } | Self::CorruptLog { .. } => ErrorKind::IoFailure,
            Self::Unrecoverable { .. } => ErrorKind::Unrecoverable,
            Self::UnsafeCommandRejected { .. } => ErrorKind::UnsafeCommandRejected,
            Self::CommandFailed { .. } | Self::Cancelled { .. } => ErrorKind::CommandFailed,
            Self::Policy(_) | Self::Config(_) => ErrorKind::Configuration,
            Self::InvalidTransition { .. } | Self::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    /// Raised before any write; the file tree is unchanged.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PreconditionMismatch
                | ErrorKind::PathStateConflict
                | ErrorKind::ConflictingPatches
                | ErrorKind::InvalidPatch
        )
    }

    /// Needs a human: retrying automatically risks further damage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::IoFailure | ErrorKind::Unrecoverable | ErrorKind::PartialRevertFailure
        )
    }

    /// Paths the error is about, for user-facing explanations.
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Patch(err) => err.path().map(|p| vec![p.to_path_buf()]).unwrap_or_default(),
            Self::ConflictingPatches { path, .. } | Self::ReservedPath { path } => {
                vec![path.clone()]
            }
            Self::PartialRevertFailure { unreverted, .. } => unreverted.clone(),
            Self::Snapshot(err) => err.path().map(|p| vec![p.to_path_buf()]).unwrap_or_default(),
            Self::Io { path, .. } | Self::CorruptLog { path, .. } => vec![path.clone()],
            Self::Unrecoverable { indeterminate, .. } => indeterminate.clone(),
            Self::CommandFailed { .. }
            | Self::Cancelled { .. }
            | Self::UnsafeCommandRejected { .. }
            | Self::EmptyTransaction
            | Self::TransactionInProgress { .. }
            | Self::NothingToUndo
            | Self::Policy(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::TaskFailed(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osaka_apply_patch::{ConflictReason, MismatchReason};
    use osaka_snapshot::ContentHash;

    #[test]
    fn test_patch_errors_map_to_taxonomy() {
        let mismatch: EngineError = PatchError::PreconditionMismatch {
            path: PathBuf::from("a.txt"),
            expected: Some(ContentHash::of(b"h0")),
            actual: Some(ContentHash::of(b"h1")),
            reason: MismatchReason::HashDiffers,
        }
        .into();
        assert_eq!(mismatch.kind(), ErrorKind::PreconditionMismatch);
        assert!(mismatch.is_validation());
        assert!(!mismatch.is_fatal());
        assert_eq!(mismatch.paths(), vec![PathBuf::from("a.txt")]);

        let conflict: EngineError = PatchError::PathStateConflict {
            path: PathBuf::from("b.txt"),
            operation: "create",
            reason: ConflictReason::AlreadyExists,
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::PathStateConflict);

        let write: EngineError = PatchError::WriteError {
            path: PathBuf::from("c.txt"),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert_eq!(write.kind(), ErrorKind::IoFailure);
        assert!(write.is_fatal());
    }

    #[test]
    fn test_path_escape_is_a_path_conflict() {
        let err: EngineError = PathError::Escapes(PathBuf::from("../x")).into();
        assert_eq!(err.kind(), ErrorKind::PathStateConflict);
        assert!(err.is_validation());
    }

    #[test]
    fn test_partial_revert_lists_unreverted_paths() {
        let err = EngineError::PartialRevertFailure {
            id: TransactionId::new(7),
            reverted: vec![PathBuf::from("c.txt")],
            failed: PathBuf::from("b.txt"),
            unreverted: vec![PathBuf::from("b.txt"), PathBuf::from("a.txt")],
            source: SnapshotError::NotAFile(PathBuf::from("b.txt")),
        };

        let msg = err.to_string();
        assert!(msg.contains("b.txt, a.txt"));
        assert!(err.is_fatal());
        assert_eq!(err.paths().len(), 2);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::NothingToUndo.to_string(), "nothing_to_undo");
        let json = serde_json::to_string(&ErrorKind::UnsafeCommandRejected).unwrap();
        assert_eq!(json, "\"unsafe_command_rejected\"");
    }
}

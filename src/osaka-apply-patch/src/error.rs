//! Error types for patch operations.

use osaka_snapshot::{ContentHash, PathError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Why the live file does not match what the patch assumed.
#[derive(Debug, Clone, PartialEq)]
pub enum MismatchReason {
    /// The content hash differs from `expected_prior_hash`.
    HashDiffers,
    /// The search text of a search/replace edit is not in the file.
    SearchTextMissing { search: String },
    /// The search text occurs more than once and `replace_all` was not set.
    SearchTextAmbiguous { occurrences: usize },
    /// A hunk's context/removed lines could not be located.
    HunkContextMissing { hunk_index: usize, original_line: usize },
    /// The file changed between validation and write.
    ChangedSincePrepare,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashDiffers => write!(f, "content hash differs from the expected prior hash"),
            Self::SearchTextMissing { search } => {
                write!(f, "search text not found: {search:?}")
            }
            Self::SearchTextAmbiguous { occurrences } => write!(
                f,
                "search text occurs {occurrences} times; set replace_all or give more context"
            ),
            Self::HunkContextMissing {
                hunk_index,
                original_line,
            } => write!(
                f,
                "could not locate hunk #{hunk_index} (originally at line {original_line})"
            ),
            Self::ChangedSincePrepare => write!(f, "file changed after the patch was validated"),
        }
    }
}

/// Why the path's existence contradicts the patch kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// `create` targeted a path that already exists.
    AlreadyExists,
    /// `modify` or `delete` targeted a path that does not exist.
    DoesNotExist,
    /// The path exists but is a directory or special file.
    NotAFile,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "path already exists"),
            Self::DoesNotExist => write!(f, "path does not exist"),
            Self::NotAFile => write!(f, "path is not a regular file"),
        }
    }
}

/// Errors that can occur during patch parsing and application.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The live content is not what the patch was written against.
    #[error("precondition failed for {path}: {reason} (expected {}, found {})", fmt_hash(.expected), fmt_hash(.actual))]
    PreconditionMismatch {
        path: PathBuf,
        expected: Option<ContentHash>,
        actual: Option<ContentHash>,
        reason: MismatchReason,
    },

    /// The path's existence contradicts the patch kind.
    #[error("cannot {operation} {path}: {reason}")]
    PathStateConflict {
        path: PathBuf,
        operation: &'static str,
        reason: ConflictReason,
    },

    /// The target path is not confined to the workspace.
    #[error(transparent)]
    PathOutsideWorkspace(#[from] PathError),

    /// The patch itself is malformed.
    #[error("invalid patch for {path}: {message}")]
    InvalidPatch { path: PathBuf, message: String },

    /// Failed to parse diff text.
    #[error("failed to parse diff at line {line_number}: {message}")]
    Parse { message: String, line_number: usize },

    /// Failed to read the target file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or delete the target file.
    #[error("failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn fmt_hash(hash: &Option<ContentHash>) -> String {
    match hash {
        Some(h) => h.short().to_string(),
        None => "<none>".to_string(),
    }
}

impl PatchError {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>, line_number: usize) -> Self {
        Self::Parse {
            message: message.into(),
            line_number,
        }
    }

    /// Create an invalid patch error.
    pub fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidPatch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before anything was written.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::ReadError { .. } | Self::WriteError { .. })
    }

    /// Path this error refers to, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::PreconditionMismatch { path, .. }
            | Self::PathStateConflict { path, .. }
            | Self::InvalidPatch { path, .. }
            | Self::ReadError { path, .. }
            | Self::WriteError { path, .. } => Some(path),
            Self::PathOutsideWorkspace(err) => Some(err.path()),
            Self::Parse { .. } => None,
        }
    }
}

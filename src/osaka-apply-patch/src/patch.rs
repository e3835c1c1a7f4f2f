//! The patch model: one proposed change to one file.

use crate::hunk::Hunk;
use osaka_snapshot::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A proposed change to a single file.
///
/// Patches come from an untrusted planner. Nothing here is trusted until
/// [`PatchApplier::prepare`](crate::PatchApplier::prepare) has validated it
/// against the live file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Patch {
    /// Create a file that must not exist yet.
    Create { path: PathBuf, content: String },

    /// Change an existing file.
    Modify {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_prior_hash: Option<ContentHash>,
        edit: Edit,
    },

    /// Delete an existing file.
    Delete {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_prior_hash: Option<ContentHash>,
    },
}

/// How a `modify` patch computes the new content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Edit {
    /// Replace the whole file.
    ReplaceAllContent { content: String },

    /// Unified-diff hunks, located against the live content.
    Hunks { hunks: Vec<Hunk> },

    /// Replace literal text.
    SearchReplace {
        search: String,
        replace: String,
        #[serde(default)]
        replace_all: bool,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
}

fn default_case_sensitive() -> bool {
    true
}

/// Kind of a patch, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    Create,
    Modify,
    Delete,
}

impl PatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Patch {
    pub fn create(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self::Create {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Replace the full content of `path`.
    pub fn replace(
        path: impl Into<PathBuf>,
        expected_prior_hash: Option<ContentHash>,
        content: impl Into<String>,
    ) -> Self {
        Self::Modify {
            path: path.into(),
            expected_prior_hash,
            edit: Edit::ReplaceAllContent {
                content: content.into(),
            },
        }
    }

    /// Replace the single occurrence of `search` with `replace`.
    pub fn search_replace(
        path: impl Into<PathBuf>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self::Modify {
            path: path.into(),
            expected_prior_hash: None,
            edit: Edit::SearchReplace {
                search: search.into(),
                replace: replace.into(),
                replace_all: false,
                case_sensitive: true,
            },
        }
    }

    pub fn hunks(
        path: impl Into<PathBuf>,
        expected_prior_hash: Option<ContentHash>,
        hunks: Vec<Hunk>,
    ) -> Self {
        Self::Modify {
            path: path.into(),
            expected_prior_hash,
            edit: Edit::Hunks { hunks },
        }
    }

    pub fn delete(path: impl Into<PathBuf>, expected_prior_hash: Option<ContentHash>) -> Self {
        Self::Delete {
            path: path.into(),
            expected_prior_hash,
        }
    }

    /// Target path as proposed (not yet normalized).
    pub fn path(&self) -> &Path {
        match self {
            Self::Create { path, .. } | Self::Modify { path, .. } | Self::Delete { path, .. } => {
                path
            }
        }
    }

    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Create { .. } => PatchKind::Create,
            Self::Modify { .. } => PatchKind::Modify,
            Self::Delete { .. } => PatchKind::Delete,
        }
    }

    /// The precondition hash, if the planner supplied one.
    pub fn expected_prior_hash(&self) -> Option<&ContentHash> {
        match self {
            Self::Create { .. } => None,
            Self::Modify {
                expected_prior_hash,
                ..
            }
            | Self::Delete {
                expected_prior_hash,
                ..
            } => expected_prior_hash.as_ref(),
        }
    }

    /// Hash of the file after this patch, when it is known without reading
    /// the live content.
    ///
    /// `Some(None)` means the file will not exist afterwards.
    pub fn resulting_hash(&self) -> Option<Option<ContentHash>> {
        match self {
            Self::Create { content, .. }
            | Self::Modify {
                edit: Edit::ReplaceAllContent { content },
                ..
            } => Some(Some(ContentHash::of(content.as_bytes()))),
            Self::Delete { .. } => Some(None),
            Self::Modify { .. } => None,
        }
    }
}

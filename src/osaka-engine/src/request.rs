//! Request and response types exchanged with the conversation layer.

use crate::error::{EngineError, ErrorKind};
use crate::transaction::TransactionId;
use osaka_apply_patch::{AppliedResult, Patch, PatchKind, parse_unified_diff};
use osaka_snapshot::ContentHash;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An ordered list of patches to apply as one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub patches: Vec<Patch>,
}

impl EditRequest {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    /// Build a request from unified diff text.
    pub fn from_unified_diff(diff: &str) -> Result<Self, EngineError> {
        Ok(Self {
            patches: parse_unified_diff(diff)?,
        })
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResult {
    pub id: TransactionId,
    pub applied: Vec<AppliedResult>,
}

/// A path and the hash it holds afterwards (`None` once deleted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultingHash {
    pub path: PathBuf,
    pub hash: Option<ContentHash>,
}

/// Error detail in a form the conversation layer can explain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
}

impl From<&EngineError> for ErrorDetail {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            paths: err.paths(),
        }
    }
}

/// Answer to an [`EditRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResponse {
    pub committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub resulting_hashes: Vec<ResultingHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl EditResponse {
    pub fn committed(result: &TransactionResult) -> Self {
        Self {
            committed: true,
            transaction_id: Some(result.id),
            resulting_hashes: result
                .applied
                .iter()
                .map(|applied| ResultingHash {
                    path: applied.path.clone(),
                    hash: applied.new_hash.clone(),
                })
                .collect(),
            error: None,
        }
    }

    pub fn failed(err: &EngineError) -> Self {
        Self {
            committed: false,
            transaction_id: None,
            resulting_hashes: Vec::new(),
            error: Some(ErrorDetail::from(err)),
        }
    }
}

/// Paths restored by a successful revert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertReport {
    pub id: TransactionId,
    /// In restore order (reverse of capture order).
    pub reverted: Vec<PathBuf>,
}

/// Dry-run result for one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewEntry {
    pub path: PathBuf,
    pub operation: PatchKind,
    pub prior_hash: Option<ContentHash>,
    pub new_hash: Option<ContentHash>,
    /// Unified diff from the live content.
    pub diff: String,
}

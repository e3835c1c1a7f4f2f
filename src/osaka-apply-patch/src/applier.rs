//! Patch validation and application.
//!
//! Application is split in two phases. [`PatchApplier::prepare`] reads the
//! live file, checks every precondition and computes the new bytes without
//! writing anything. [`PatchApplier::commit`] re-checks that the file has not
//! changed since, then writes durably.

use crate::error::{ConflictReason, MismatchReason, PatchError, PatchResult};
use crate::hunk::{Hunk, HunkLine, find_overlap};
use crate::locate::{HunkLocator, MatchConfig, MatchQuality};
use crate::patch::{Edit, Patch, PatchKind};
use crate::preview::render_diff;
use osaka_snapshot::{
    ContentHash, durable_remove, is_missing, resolve_in_workspace, write_durable,
};
use regex::{NoExpand, RegexBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where one hunk landed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HunkReport {
    /// Hunk index in the patch (0-based).
    pub index: usize,
    /// Line number from the hunk header.
    pub original_line: usize,
    /// Line number where it was applied (1-based).
    pub applied_line: usize,
    pub quality: MatchQuality,
}

/// A validated patch, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedPatch {
    path: PathBuf,
    absolute: PathBuf,
    kind: PatchKind,
    prior: Option<Vec<u8>>,
    prior_hash: Option<ContentHash>,
    new_content: Option<Vec<u8>>,
    hunks: Vec<HunkReport>,
}

impl PreparedPatch {
    /// Normalized workspace-relative path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PatchKind {
        self.kind
    }

    /// Hash of the live file at prepare time.
    pub fn prior_hash(&self) -> Option<&ContentHash> {
        self.prior_hash.as_ref()
    }

    /// Bytes the file will hold afterwards, `None` for a delete.
    pub fn new_content(&self) -> Option<&[u8]> {
        self.new_content.as_deref()
    }

    pub fn new_hash(&self) -> Option<ContentHash> {
        self.new_content.as_deref().map(ContentHash::of)
    }

    pub fn hunks(&self) -> &[HunkReport] {
        &self.hunks
    }

    /// Unified diff from the live content to the prepared content.
    pub fn diff(&self) -> String {
        render_diff(&self.path, self.prior.as_deref(), self.new_content.as_deref())
    }
}

/// Outcome of a written patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedResult {
    pub path: PathBuf,
    pub operation: PatchKind,
    pub prior_hash: Option<ContentHash>,
    /// Hash after the write, `None` once the file is deleted.
    pub new_hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hunks: Vec<HunkReport>,
}

/// Applies patches to files under a workspace root.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    root: PathBuf,
    locator: HunkLocator,
}

impl PatchApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_match_config(root, MatchConfig::default())
    }

    pub fn with_match_config(root: impl Into<PathBuf>, config: MatchConfig) -> Self {
        Self {
            root: root.into(),
            locator: HunkLocator::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `patch` against the live file and compute the result.
    /// Never writes.
    pub fn prepare(&self, patch: &Patch) -> PatchResult<PreparedPatch> {
        let kind = patch.kind();
        let (path, absolute) = resolve_in_workspace(&self.root, patch.path())?;
        let prior = read_live(&path, &absolute, kind)?;
        let prior_hash = prior.as_deref().map(ContentHash::of);

        let conflict = |reason| PatchError::PathStateConflict {
            path: path.clone(),
            operation: kind.as_str(),
            reason,
        };

        let (new_content, hunks) = match patch {
            Patch::Create { content, .. } => {
                if prior.is_some() {
                    return Err(conflict(ConflictReason::AlreadyExists));
                }
                (Some(content.clone().into_bytes()), Vec::new())
            }
            Patch::Modify {
                expected_prior_hash,
                edit,
                ..
            } => {
                let Some(current) = prior.as_deref() else {
                    return Err(conflict(ConflictReason::DoesNotExist));
                };
                check_expected(&path, expected_prior_hash.as_ref(), prior_hash.as_ref())?;
                let (bytes, hunks) = self.compute_edit(
                    &path,
                    current,
                    edit,
                    &prior_hash,
                    expected_prior_hash.as_ref(),
                )?;
                (Some(bytes), hunks)
            }
            Patch::Delete {
                expected_prior_hash,
                ..
            } => {
                if prior.is_none() {
                    return Err(conflict(ConflictReason::DoesNotExist));
                }
                check_expected(&path, expected_prior_hash.as_ref(), prior_hash.as_ref())?;
                (None, Vec::new())
            }
        };

        debug!(path = %path.display(), kind = %kind, "prepared patch");
        Ok(PreparedPatch {
            path,
            absolute,
            kind,
            prior,
            prior_hash,
            new_content,
            hunks,
        })
    }

    /// Write a prepared patch, failing if the file changed since `prepare`.
    ///
    /// The write is flushed to storage before this returns.
    pub fn commit(&self, prepared: PreparedPatch) -> PatchResult<AppliedResult> {
        let live = read_live(&prepared.path, &prepared.absolute, prepared.kind)?;
        let live_hash = live.as_deref().map(ContentHash::of);
        if live_hash != prepared.prior_hash {
            return Err(PatchError::PreconditionMismatch {
                path: prepared.path,
                expected: prepared.prior_hash,
                actual: live_hash,
                reason: MismatchReason::ChangedSincePrepare,
            });
        }

        let new_hash = prepared.new_hash();
        match prepared.new_content.as_deref() {
            Some(bytes) => write_durable(&prepared.absolute, bytes),
            None => durable_remove(&prepared.absolute),
        }
        .map_err(|source| PatchError::WriteError {
            path: prepared.path.clone(),
            source,
        })?;

        debug!(
            path = %prepared.path.display(),
            kind = %prepared.kind,
            new_hash = new_hash.as_ref().map(ContentHash::short),
            "applied patch"
        );
        Ok(AppliedResult {
            path: prepared.path,
            operation: prepared.kind,
            prior_hash: prepared.prior_hash,
            new_hash,
            hunks: prepared.hunks,
        })
    }

    /// `prepare` followed by `commit`.
    pub fn apply(&self, patch: &Patch) -> PatchResult<AppliedResult> {
        let prepared = self.prepare(patch)?;
        self.commit(prepared)
    }

    fn compute_edit(
        &self,
        path: &Path,
        current: &[u8],
        edit: &Edit,
        live_hash: &Option<ContentHash>,
        expected: Option<&ContentHash>,
    ) -> PatchResult<(Vec<u8>, Vec<HunkReport>)> {
        let mismatch = |reason| PatchError::PreconditionMismatch {
            path: path.to_path_buf(),
            expected: expected.cloned(),
            actual: live_hash.clone(),
            reason,
        };

        match edit {
            Edit::ReplaceAllContent { content } => Ok((content.clone().into_bytes(), Vec::new())),
            Edit::Hunks { hunks } => {
                let text = as_text(path, current)?;
                let (updated, reports) = self.apply_hunks(path, text, hunks, mismatch)?;
                Ok((updated.into_bytes(), reports))
            }
            Edit::SearchReplace {
                search,
                replace,
                replace_all,
                case_sensitive,
            } => {
                if search.is_empty() {
                    return Err(PatchError::invalid(path, "search text is empty"));
                }
                let text = as_text(path, current)?;
                let pattern = RegexBuilder::new(&regex::escape(search))
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| PatchError::invalid(path, e.to_string()))?;

                let occurrences = pattern.find_iter(text).count();
                if occurrences == 0 {
                    return Err(mismatch(MismatchReason::SearchTextMissing {
                        search: search.clone(),
                    }));
                }
                if occurrences > 1 && !replace_all {
                    return Err(mismatch(MismatchReason::SearchTextAmbiguous { occurrences }));
                }

                let updated = pattern.replace_all(text, NoExpand(replace));
                Ok((updated.into_owned().into_bytes(), Vec::new()))
            }
        }
    }

    fn apply_hunks(
        &self,
        path: &Path,
        text: &str,
        hunks: &[Hunk],
        mismatch: impl Fn(MismatchReason) -> PatchError,
    ) -> PatchResult<(String, Vec<HunkReport>)> {
        if hunks.is_empty() || hunks.iter().all(Hunk::is_noop) {
            return Err(PatchError::invalid(path, "hunk list changes nothing"));
        }
        if let Some((first, second)) = find_overlap(hunks) {
            return Err(PatchError::invalid(
                path,
                format!("hunks #{first} and #{second} overlap"),
            ));
        }

        let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let had_trailing_newline = text.is_empty() || text.ends_with('\n');
        let mut lines: Vec<String> = text.lines().map(String::from).collect();
        let mut reports = Vec::with_capacity(hunks.len());
        let mut line_offset: isize = 0;

        let mut order: Vec<usize> = (0..hunks.len()).collect();
        order.sort_by_key(|&i| hunks[i].old_start);

        for index in order {
            let hunk = &hunks[index];
            let suggested = (hunk.old_start.saturating_sub(1) as isize + line_offset).max(0) as usize;
            let match_lines = hunk.old_lines();

            let Some((start, quality)) = self.locator.find_position(&lines, &match_lines, suggested)
            else {
                return Err(mismatch(MismatchReason::HunkContextMissing {
                    hunk_index: index,
                    original_line: hunk.old_start,
                }));
            };

            let end = (start + match_lines.len()).min(lines.len());
            let replacement = splice_lines(hunk, &lines[start..end]);
            let added = replacement.len();
            lines.splice(start..end, replacement);
            line_offset += added as isize - match_lines.len() as isize;

            reports.push(HunkReport {
                index,
                original_line: hunk.old_start,
                applied_line: start + 1,
                quality,
            });
        }

        reports.sort_by_key(|r| r.index);

        let mut content = lines.join(eol);
        if had_trailing_newline && !content.is_empty() {
            content.push_str(eol);
        }
        Ok((content, reports))
    }
}

/// The lines that replace `matched`. Context keeps the live text, so a
/// line located by a whitespace-insensitive match is not rewritten.
fn splice_lines(hunk: &Hunk, matched: &[String]) -> Vec<String> {
    let mut live = matched.iter();
    let mut out = Vec::with_capacity(hunk.new_lines().len());
    for line in &hunk.lines {
        match line {
            HunkLine::Context(text) => {
                out.push(live.next().cloned().unwrap_or_else(|| text.clone()));
            }
            HunkLine::Remove(_) => {
                live.next();
            }
            HunkLine::Add(text) => out.push(text.clone()),
        }
    }
    out
}

fn check_expected(
    path: &Path,
    expected: Option<&ContentHash>,
    actual: Option<&ContentHash>,
) -> PatchResult<()> {
    match expected {
        Some(expected) if Some(expected) != actual => Err(PatchError::PreconditionMismatch {
            path: path.to_path_buf(),
            expected: Some(expected.clone()),
            actual: actual.cloned(),
            reason: MismatchReason::HashDiffers,
        }),
        _ => Ok(()),
    }
}

fn as_text<'a>(path: &Path, bytes: &'a [u8]) -> PatchResult<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|_| PatchError::invalid(path, "text edits require UTF-8 content"))
}

/// Read the live file. `Ok(None)` means nothing exists at the path.
fn read_live(relative: &Path, absolute: &Path, kind: PatchKind) -> PatchResult<Option<Vec<u8>>> {
    match fs::symlink_metadata(absolute) {
        Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {}
        Ok(_) => {
            return Err(PatchError::PathStateConflict {
                path: relative.to_path_buf(),
                operation: kind.as_str(),
                reason: ConflictReason::NotAFile,
            });
        }
        Err(e) if is_missing(&e) => return Ok(None),
        Err(source) => {
            return Err(PatchError::ReadError {
                path: relative.to_path_buf(),
                source,
            });
        }
    }

    match fs::read(absolute) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if is_missing(&e) => Ok(None),
        Err(source) => Err(PatchError::ReadError {
            path: relative.to_path_buf(),
            source,
        }),
    }
}

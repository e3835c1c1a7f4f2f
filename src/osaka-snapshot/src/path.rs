//! Workspace path confinement.
//!
//! Paths proposed by the planner are untrusted. They must be relative to the
//! workspace root and must stay inside it after `.` and `..` are resolved.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Reasons a proposed path is refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// Empty path or a path that resolves to the workspace root itself.
    #[error("path '{}' does not name a file", .0.display())]
    Empty(PathBuf),

    /// Absolute path or a path with a prefix/root component.
    #[error("path '{}' must be relative to the workspace root", .0.display())]
    Absolute(PathBuf),

    /// Path climbs above the workspace root.
    #[error("path '{}' escapes the workspace root", .0.display())]
    Escapes(PathBuf),
}

impl PathError {
    /// The offending path as proposed.
    pub fn path(&self) -> &Path {
        match self {
            Self::Empty(p) | Self::Absolute(p) | Self::Escapes(p) => p,
        }
    }
}

/// Normalize `relative` and join it onto `root`.
///
/// Returns the normalized relative path together with the absolute path.
/// Symlinks are not followed: confinement is lexical.
pub fn resolve_in_workspace(root: &Path, relative: &Path) -> Result<(PathBuf, PathBuf), PathError> {
    let mut normalized = PathBuf::new();

    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(PathError::Absolute(relative.to_path_buf()));
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(PathError::Escapes(relative.to_path_buf()));
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PathError::Empty(relative.to_path_buf()));
    }

    let absolute = root.join(&normalized);
    Ok((normalized, absolute))
}

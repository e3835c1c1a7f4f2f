//! Classification of path-like command arguments.

use crate::rules::{RuleSet, TargetClass};

/// Answers "what kind of path is this argument" for rule matching.
#[derive(Debug, Clone)]
pub(crate) struct PathClassifier {
    sensitive_paths: Vec<String>,
    block_device_prefixes: Vec<String>,
    harmless_redirect_targets: Vec<String>,
}

impl PathClassifier {
    pub fn new(rules: &RuleSet) -> Self {
        Self {
            sensitive_paths: rules.sensitive_paths.iter().map(|p| normalize_path(p)).collect(),
            block_device_prefixes: rules.block_device_prefixes.clone(),
            harmless_redirect_targets: rules.harmless_redirect_targets.clone(),
        }
    }

    pub fn is(&self, class: TargetClass, arg: &str) -> bool {
        match class {
            TargetClass::Sensitive => self.is_sensitive_path(arg),
            TargetClass::BlockDevice => self.is_block_device(arg),
            TargetClass::OutsideWorkspace => is_outside_workspace(arg),
        }
    }

    /// Exact match or inside a sensitive directory.
    pub fn is_sensitive_path(&self, arg: &str) -> bool {
        let normalized = normalize_path(arg);

        self.sensitive_paths.iter().any(|sensitive| {
            normalized == *sensitive
                || (sensitive != "/" && normalized.starts_with(&format!("{sensitive}/")))
        })
    }

    pub fn is_block_device(&self, arg: &str) -> bool {
        self.block_device_prefixes
            .iter()
            .any(|prefix| arg.starts_with(prefix.as_str()))
    }

    /// Redirect targets that never need confinement (`/dev/null` and friends).
    pub fn is_harmless_redirect(&self, target: &str) -> bool {
        self.harmless_redirect_targets.iter().any(|t| t == target)
    }
}

/// Normalize a path for comparison.
///
/// Collapses repeated and trailing slashes, drops a trailing `*` glob, maps
/// `~` to `/home` and Windows separators to `/`, and resolves `.` and `..`
/// lexically. `..` never climbs above `/`; leading `..` of a relative path
/// is kept.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");

    if let Some(rest) = normalized.strip_prefix('~') {
        normalized = format!("/home{rest}");
    }

    if normalized.ends_with("/*") {
        normalized.pop();
    }

    let absolute = normalized.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// True for arguments that may resolve outside the working directory:
/// absolute paths, home-relative paths, drive paths, unexpanded variables
/// and relative paths that climb above the start.
pub(crate) fn is_outside_workspace(arg: &str) -> bool {
    if arg.contains('$') {
        return true;
    }

    let normalized = normalize_path(arg);
    if normalized.starts_with('/') {
        return true;
    }

    let mut chars = normalized.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next())
        && drive.is_ascii_alphabetic()
    {
        return true;
    }

    let mut depth: isize = 0;
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}

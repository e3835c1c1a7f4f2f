//! Unified diff parsing.
//!
//! Accepts plain unified diffs and git-style diffs and turns each file
//! section into a [`Patch`]. Renames and binary patches are refused: they
//! cannot be expressed as a single-path create, modify or delete.

use crate::error::{PatchError, PatchResult};
use crate::hunk::{Hunk, HunkLine};
use crate::patch::Patch;
use std::path::PathBuf;

const DEV_NULL: &str = "/dev/null";

/// One file section while it is being parsed.
#[derive(Debug, Default)]
struct FileSection {
    old_path: Option<PathBuf>,
    new_path: Option<PathBuf>,
    is_new_file: bool,
    is_deleted: bool,
    is_rename: bool,
    is_binary: bool,
    new_missing_newline: bool,
    hunks: Vec<Hunk>,
}

impl FileSection {
    fn display_path(&self) -> PathBuf {
        self.new_path
            .clone()
            .or_else(|| self.old_path.clone())
            .unwrap_or_default()
    }

    fn into_patch(self, header_line: usize) -> PatchResult<Option<Patch>> {
        if self.is_binary {
            return Err(PatchError::invalid(
                self.display_path(),
                "binary patches are not supported",
            ));
        }
        if self.is_rename
            || matches!((&self.old_path, &self.new_path), (Some(a), Some(b)) if a != b)
        {
            return Err(PatchError::invalid(
                self.display_path(),
                "renames are not supported; express them as a delete and a create",
            ));
        }

        if self.is_new_file {
            let path = self
                .new_path
                .ok_or_else(|| PatchError::parse("new file without a target path", header_line))?;
            let mut content = self
                .hunks
                .iter()
                .flat_map(|h| h.new_lines())
                .collect::<Vec<_>>()
                .join("\n");
            if !content.is_empty() && !self.new_missing_newline {
                content.push('\n');
            }
            return Ok(Some(Patch::create(path, content)));
        }

        if self.is_deleted {
            let path = self
                .old_path
                .ok_or_else(|| PatchError::parse("deletion without a source path", header_line))?;
            return Ok(Some(Patch::delete(path, None)));
        }

        // Mode-only changes carry no content edit.
        if self.hunks.is_empty() {
            return Ok(None);
        }

        let path = self
            .new_path
            .or(self.old_path)
            .ok_or_else(|| PatchError::parse("file section without a path", header_line))?;
        Ok(Some(Patch::hunks(path, None, self.hunks)))
    }
}

/// Remaining body lines of the hunk being read.
#[derive(Debug, Clone, Copy)]
struct Remaining {
    old: usize,
    new: usize,
}

impl Remaining {
    fn is_done(self) -> bool {
        self.old == 0 && self.new == 0
    }
}

/// Parse a unified or git-style diff into patches, one per file section.
///
/// Text before the first file header (commit messages, `index` lines) is
/// ignored.
pub fn parse_unified_diff(diff: &str) -> PatchResult<Vec<Patch>> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut patches = Vec::new();
    let mut section: Option<(FileSection, usize)> = None;
    let mut remaining: Option<Remaining> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let line_number = i + 1;

        if let Some(left) = remaining.as_mut()
            && !left.is_done()
            && let Some(hunk_line) = parse_body_line(line)
        {
            match &hunk_line {
                HunkLine::Context(_) => {
                    left.old = left.old.saturating_sub(1);
                    left.new = left.new.saturating_sub(1);
                }
                HunkLine::Remove(_) => left.old = left.old.saturating_sub(1),
                HunkLine::Add(_) => left.new = left.new.saturating_sub(1),
            }
            if let Some((current, _)) = section.as_mut()
                && let Some(hunk) = current.hunks.last_mut()
            {
                hunk.push(hunk_line);
            }
            i += 1;
            continue;
        }

        if line.starts_with("diff --git ") {
            finish(&mut section, &mut patches)?;
            let (old_path, new_path) = parse_git_header(line);
            section = Some((
                FileSection {
                    old_path,
                    new_path,
                    ..Default::default()
                },
                line_number,
            ));
            remaining = None;
            i += 1;
            continue;
        }

        if let Some(old_str) = line.strip_prefix("--- ") {
            let Some(new_str) = lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")) else {
                return Err(PatchError::parse("'---' header without '+++'", line_number));
            };

            // A git section already open for this file keeps its metadata.
            let in_git_section = section
                .as_ref()
                .is_some_and(|(s, _)| s.hunks.is_empty() && remaining.is_none());
            if !in_git_section {
                finish(&mut section, &mut patches)?;
                section = Some((FileSection::default(), line_number));
            }

            if let Some((current, _)) = section.as_mut() {
                match parse_file_path(old_str) {
                    Some(path) if path.as_os_str() == DEV_NULL => {
                        current.is_new_file = true;
                        current.old_path = None;
                    }
                    Some(path) if !current.is_rename => current.old_path = Some(path),
                    _ => {}
                }
                match parse_file_path(new_str) {
                    Some(path) if path.as_os_str() == DEV_NULL => {
                        current.is_deleted = true;
                        current.new_path = None;
                    }
                    Some(path) if !current.is_rename => current.new_path = Some(path),
                    _ => {}
                }
            }
            remaining = None;
            i += 2;
            continue;
        }

        if line.starts_with("@@") {
            let Some((current, _)) = section.as_mut() else {
                return Err(PatchError::parse("hunk header before any file header", line_number));
            };
            let hunk = parse_hunk_header(line)
                .ok_or_else(|| PatchError::parse(format!("malformed hunk header: {line}"), line_number))?;
            remaining = Some(Remaining {
                old: hunk.old_count,
                new: hunk.new_count,
            });
            current.hunks.push(hunk);
            i += 1;
            continue;
        }

        if line.starts_with('\\') {
            // "\ No newline at end of file" refers to the previous body line.
            if let Some((current, _)) = section.as_mut()
                && let Some(last) = current.hunks.last().and_then(|h| h.lines.last())
                && last.in_new().is_some()
            {
                current.new_missing_newline = true;
            }
            i += 1;
            continue;
        }

        if let Some((current, _)) = section.as_mut() {
            apply_git_metadata(current, line);
        }
        i += 1;
    }

    finish(&mut section, &mut patches)?;
    Ok(patches)
}

fn finish(section: &mut Option<(FileSection, usize)>, patches: &mut Vec<Patch>) -> PatchResult<()> {
    if let Some((current, header_line)) = section.take()
        && let Some(patch) = current.into_patch(header_line)?
    {
        patches.push(patch);
    }
    Ok(())
}

fn parse_body_line(line: &str) -> Option<HunkLine> {
    if let Some(content) = line.strip_prefix(' ') {
        Some(HunkLine::Context(content.to_string()))
    } else if let Some(content) = line.strip_prefix('+') {
        Some(HunkLine::Add(content.to_string()))
    } else if let Some(content) = line.strip_prefix('-') {
        Some(HunkLine::Remove(content.to_string()))
    } else if line.is_empty() {
        // Some tools strip the space from empty context lines.
        Some(HunkLine::Context(String::new()))
    } else {
        None
    }
}

fn apply_git_metadata(section: &mut FileSection, line: &str) {
    if line.starts_with("new file mode ") {
        section.is_new_file = true;
    } else if line.starts_with("deleted file mode ") {
        section.is_deleted = true;
    } else if let Some(path) = line.strip_prefix("rename from ") {
        section.is_rename = true;
        section.old_path = Some(PathBuf::from(path));
    } else if let Some(path) = line.strip_prefix("rename to ") {
        section.is_rename = true;
        section.new_path = Some(PathBuf::from(path));
    } else if line == "GIT binary patch" || line.starts_with("Binary files ") {
        section.is_binary = true;
    }
}

/// Parse a path from a `---` / `+++` header.
fn parse_file_path(path_str: &str) -> Option<PathBuf> {
    // Drop the timestamp some tools append after a tab.
    let path = path_str.split('\t').next().unwrap_or(path_str).trim();
    let path = path.trim_matches('"');
    if path == DEV_NULL {
        return Some(PathBuf::from(DEV_NULL));
    }

    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);

    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Parse `diff --git a/path b/path`.
fn parse_git_header(line: &str) -> (Option<PathBuf>, Option<PathBuf>) {
    let rest = line.strip_prefix("diff --git ").unwrap_or(line);

    match rest.find(" b/") {
        Some(split) => (
            rest[..split].strip_prefix("a/").map(PathBuf::from),
            rest[split + 1..].strip_prefix("b/").map(PathBuf::from),
        ),
        None => (None, None),
    }
}

/// Parse `@@ -start,count +start,count @@ [section]`.
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let body = line.trim().strip_prefix("@@")?;
    let end = body.find("@@")?;
    let ranges: Vec<&str> = body[..end].split_whitespace().collect();
    if ranges.len() != 2 {
        return None;
    }

    let (old_start, old_count) = parse_range(ranges[0].strip_prefix('-')?)?;
    let (new_start, new_count) = parse_range(ranges[1].strip_prefix('+')?)?;

    let mut hunk = Hunk::new(old_start, old_count, new_start, new_count);
    let section = body[end + 2..].trim();
    if !section.is_empty() {
        hunk.section_header = Some(section.to_string());
    }
    Some(hunk)
}

/// Parse `start,count` or `start` (count defaults to 1).
fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Edit, PatchKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_modify() {
        let diff = "--- a/test.txt\n+++ b/test.txt\n@@ -1,3 +1,4 @@\n line 1\n+new line\n line 2\n line 3\n";

        let patches = parse_unified_diff(diff).unwrap();

        assert_eq!(patches.len(), 1);
        let Patch::Modify {
            path,
            edit: Edit::Hunks { hunks },
            ..
        } = &patches[0]
        else {
            panic!("expected a hunk modify, got {:?}", patches[0]);
        };
        assert_eq!(path, &PathBuf::from("test.txt"));
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_count, 3);
        assert_eq!(hunks[0].new_count, 4);
        assert!(hunks[0].header_matches_body());
    }

    #[test]
    fn test_parse_create_and_delete() {
        let diff = "\
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+hello
+world
diff --git a/old.txt b/old.txt
deleted file mode 100644
--- a/old.txt
+++ /dev/null
@@ -1 +0,0 @@
-bye
";
        let patches = parse_unified_diff(diff).unwrap();

        assert_eq!(
            patches,
            vec![
                Patch::create("new.txt", "hello\nworld\n"),
                Patch::delete("old.txt", None),
            ]
        );
    }

    #[test]
    fn test_create_without_trailing_newline() {
        let diff = "--- /dev/null\n+++ b/x.txt\n@@ -0,0 +1 @@\n+no newline\n\\ No newline at end of file\n";

        let patches = parse_unified_diff(diff).unwrap();
        assert_eq!(patches, vec![Patch::create("x.txt", "no newline")]);
    }

    #[test]
    fn test_removed_line_that_looks_like_a_header() {
        let diff = "--- a/x.md\n+++ b/x.md\n@@ -1,2 +1,1 @@\n--- rule\n keep\n";

        let patches = parse_unified_diff(diff).unwrap();
        let Patch::Modify {
            edit: Edit::Hunks { hunks },
            ..
        } = &patches[0]
        else {
            panic!("expected a hunk modify");
        };
        assert_eq!(hunks[0].lines[0], HunkLine::Remove("-- rule".to_string()));
    }

    #[test]
    fn test_multiple_files() {
        let diff = "\
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-a
+A
--- a/b.txt
+++ b/b.txt
@@ -1 +1 @@
-b
+B
";
        let patches = parse_unified_diff(diff).unwrap();
        let paths: Vec<_> = patches.iter().map(|p| p.path().to_path_buf()).collect();
        assert_eq!(paths, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert!(patches.iter().all(|p| p.kind() == PatchKind::Modify));
    }

    #[test]
    fn test_rename_and_binary_rejected() {
        let rename = "diff --git a/x b/y\nsimilarity index 100%\nrename from x\nrename to y\n";
        assert!(matches!(
            parse_unified_diff(rename),
            Err(PatchError::InvalidPatch { .. })
        ));

        let binary = "diff --git a/img.png b/img.png\nBinary files a/img.png and b/img.png differ\n";
        assert!(matches!(
            parse_unified_diff(binary),
            Err(PatchError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            parse_unified_diff("--- a/x\nnot a header\n"),
            Err(PatchError::Parse { line_number: 1, .. })
        ));
        assert!(matches!(
            parse_unified_diff("--- a/x\n+++ b/x\n@@ -x +1 @@\n"),
            Err(PatchError::Parse { line_number: 3, .. })
        ));
    }

    #[test]
    fn test_hunk_header_section() {
        let hunk = parse_hunk_header("@@ -10,7 +10,8 @@ fn main() {").unwrap();
        assert_eq!((hunk.old_start, hunk.old_count), (10, 7));
        assert_eq!((hunk.new_start, hunk.new_count), (10, 8));
        assert_eq!(hunk.section_header.as_deref(), Some("fn main() {"));
    }
}

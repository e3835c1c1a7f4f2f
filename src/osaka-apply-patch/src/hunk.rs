//! Unified-diff hunks.

use serde::{Deserialize, Serialize};

/// One body line of a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "snake_case")]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Context(s) | Self::Add(s) | Self::Remove(s) => s,
        }
    }

    /// The line as it must appear in the live file, if it does.
    pub fn in_old(&self) -> Option<&str> {
        match self {
            Self::Context(s) | Self::Remove(s) => Some(s),
            Self::Add(_) => None,
        }
    }

    /// The line as it will appear after the edit, if it does.
    pub fn in_new(&self) -> Option<&str> {
        match self {
            Self::Context(s) | Self::Add(s) => Some(s),
            Self::Remove(_) => None,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Context(_))
    }
}

/// A contiguous block of changes, positioned by its `@@` header.
///
/// The header positions are hints. The applier locates the old lines in the
/// live file and may find them elsewhere within the configured offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// 1-based; 0 for an insertion into an empty file.
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Text after the closing `@@`, usually the enclosing function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_header: Option<String>,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    pub fn new(old_start: usize, old_count: usize, new_start: usize, new_count: usize) -> Self {
        Self {
            old_start,
            old_count,
            new_start,
            new_count,
            section_header: None,
            lines: Vec::new(),
        }
    }

    /// Builder: append a line.
    pub fn with_line(mut self, line: HunkLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn push(&mut self, line: HunkLine) {
        self.lines.push(line);
    }

    /// Lines the live file must contain, in order.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines.iter().filter_map(HunkLine::in_old).collect()
    }

    /// Lines that replace them.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines.iter().filter_map(HunkLine::in_new).collect()
    }

    pub fn is_noop(&self) -> bool {
        !self.lines.iter().any(HunkLine::is_change)
    }

    /// Whether the `@@` counts agree with the body.
    pub fn header_matches_body(&self) -> bool {
        self.old_lines().len() == self.old_count && self.new_lines().len() == self.new_count
    }

    /// One past the last original line the hunk claims.
    fn old_end(&self) -> usize {
        self.old_start + self.old_count
    }
}

/// Indices of the first two hunks whose original ranges overlap.
pub fn find_overlap(hunks: &[Hunk]) -> Option<(usize, usize)> {
    let mut order: Vec<usize> = (0..hunks.len()).collect();
    order.sort_by_key(|&i| hunks[i].old_start);

    order
        .windows(2)
        .find(|pair| hunks[pair[0]].old_end() > hunks[pair[1]].old_start)
        .map(|pair| (pair[0].min(pair[1]), pair[0].max(pair[1])))
}

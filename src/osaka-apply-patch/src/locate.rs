//! Locating hunks in the live file.
//!
//! Planner-produced hunks often carry stale line numbers. The locator
//! searches outward from the suggested position for the hunk's context and
//! removed lines, optionally tolerating whitespace drift. Similarity-based
//! matching is off unless `min_similarity` is lowered below 1.0.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Tolerance used when locating hunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Maximum number of lines to search either side of the suggested start.
    #[serde(default = "default_max_offset")]
    pub max_offset: usize,
    /// Average per-line similarity (0.0 to 1.0) required for a fuzzy match.
    /// 1.0 disables fuzzy matching.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Compare lines with leading and trailing whitespace trimmed.
    #[serde(default = "default_ignore_whitespace")]
    pub ignore_whitespace: bool,
}

fn default_max_offset() -> usize {
    100
}

fn default_min_similarity() -> f64 {
    1.0
}

fn default_ignore_whitespace() -> bool {
    true
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_offset: default_max_offset(),
            min_similarity: default_min_similarity(),
            ignore_whitespace: default_ignore_whitespace(),
        }
    }
}

impl MatchConfig {
    /// Only accept the hunk at exactly its stated position and content.
    pub fn strict() -> Self {
        Self {
            max_offset: 0,
            min_similarity: 1.0,
            ignore_whitespace: false,
        }
    }

    pub fn with_max_offset(mut self, max_offset: usize) -> Self {
        self.max_offset = max_offset;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity.clamp(0.0, 1.0);
        self
    }
}

/// How a hunk's position was found.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "quality", content = "value", rename_all = "snake_case")]
pub enum MatchQuality {
    /// Found at the suggested line.
    Exact,
    /// Found this many lines away from the suggested line.
    Offset(isize),
    /// Found by similarity with the given score.
    Fuzzy(f64),
}

/// Finds where a hunk applies in the live content.
#[derive(Debug, Clone, Default)]
pub struct HunkLocator {
    config: MatchConfig,
}

impl HunkLocator {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Find the 0-indexed line where `match_lines` start.
    ///
    /// An empty `match_lines` (pure insertion) matches at the suggested
    /// position, clamped to the end of the file.
    pub fn find_position(
        &self,
        file_lines: &[String],
        match_lines: &[&str],
        suggested_start: usize,
    ) -> Option<(usize, MatchQuality)> {
        if match_lines.is_empty() {
            return Some((suggested_start.min(file_lines.len()), MatchQuality::Exact));
        }

        if self.matches_at(file_lines, match_lines, suggested_start) {
            return Some((suggested_start, MatchQuality::Exact));
        }

        for offset in 1..=self.config.max_offset {
            if suggested_start >= offset {
                let pos = suggested_start - offset;
                if self.matches_at(file_lines, match_lines, pos) {
                    return Some((pos, MatchQuality::Offset(-(offset as isize))));
                }
            }

            let pos = suggested_start + offset;
            if pos < file_lines.len() && self.matches_at(file_lines, match_lines, pos) {
                return Some((pos, MatchQuality::Offset(offset as isize)));
            }
        }

        if self.config.min_similarity < 1.0 {
            return self.find_fuzzy(file_lines, match_lines, suggested_start);
        }

        None
    }

    fn matches_at(&self, file_lines: &[String], match_lines: &[&str], start: usize) -> bool {
        if start + match_lines.len() > file_lines.len() {
            return false;
        }

        match_lines
            .iter()
            .zip(&file_lines[start..])
            .all(|(expected, actual)| self.normalize(expected) == self.normalize(actual))
    }

    fn find_fuzzy(
        &self,
        file_lines: &[String],
        match_lines: &[&str],
        suggested_start: usize,
    ) -> Option<(usize, MatchQuality)> {
        let mut best: Option<(usize, f64)> = None;

        let search_start = suggested_start.saturating_sub(self.config.max_offset);
        let search_end = (suggested_start + self.config.max_offset + 1).min(file_lines.len());

        for pos in search_start..search_end {
            if pos + match_lines.len() > file_lines.len() {
                break;
            }

            let score = match_lines
                .iter()
                .zip(&file_lines[pos..])
                .map(|(expected, actual)| self.line_similarity(expected, actual))
                .sum::<f64>()
                / match_lines.len() as f64;

            if score >= self.config.min_similarity && best.is_none_or(|(_, s)| score > s) {
                best = Some((pos, score));
            }
        }

        best.map(|(pos, score)| (pos, MatchQuality::Fuzzy(score)))
    }

    fn line_similarity(&self, expected: &str, actual: &str) -> f64 {
        let expected = self.normalize(expected);
        let actual = self.normalize(actual);

        if expected == actual {
            return 1.0;
        }
        if expected.is_empty() || actual.is_empty() {
            return 0.0;
        }

        let diff = TextDiff::from_chars(expected, actual);
        let (same, total) = diff
            .iter_all_changes()
            .fold((0usize, 0usize), |(same, total), change| {
                if change.tag() == ChangeTag::Equal {
                    (same + 1, total + 1)
                } else {
                    (same, total + 1)
                }
            });

        if total == 0 {
            1.0
        } else {
            same as f64 / total as f64
        }
    }

    fn normalize<'a>(&self, line: &'a str) -> &'a str {
        if self.config.ignore_whitespace {
            line.trim()
        } else {
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(String::from).collect()
    }

    #[test]
    fn test_exact_position() {
        let file = lines("a\nb\nc\nd");
        let locator = HunkLocator::default();

        assert_eq!(
            locator.find_position(&file, &["b", "c"], 1),
            Some((1, MatchQuality::Exact))
        );
    }

    #[test]
    fn test_offset_both_directions() {
        let file = lines("x\nx\na\nb\nx\nx");
        let locator = HunkLocator::default();

        assert_eq!(
            locator.find_position(&file, &["a", "b"], 0),
            Some((2, MatchQuality::Offset(2)))
        );
        assert_eq!(
            locator.find_position(&file, &["a", "b"], 4),
            Some((2, MatchQuality::Offset(-2)))
        );
    }

    #[test]
    fn test_whitespace_tolerance() {
        let file = lines("fn main() {\n    body();\n}");

        let lenient = HunkLocator::default();
        assert!(lenient.find_position(&file, &["  body();"], 1).is_some());

        let strict = HunkLocator::new(MatchConfig::strict());
        assert!(strict.find_position(&file, &["  body();"], 1).is_none());
    }

    #[test]
    fn test_fuzzy_is_opt_in() {
        let file = lines("let total = compute(a, b);");
        let hunk = ["let total = compute(a, c);"];

        assert!(HunkLocator::default().find_position(&file, &hunk, 0).is_none());

        let fuzzy = HunkLocator::new(MatchConfig::default().with_min_similarity(0.8));
        let (pos, quality) = fuzzy.find_position(&file, &hunk, 0).unwrap();
        assert_eq!(pos, 0);
        assert!(matches!(quality, MatchQuality::Fuzzy(score) if score >= 0.8));
    }

    #[test]
    fn test_insertion_clamps_to_end() {
        let file = lines("a");
        let locator = HunkLocator::default();
        assert_eq!(
            locator.find_position(&file, &[], 10),
            Some((1, MatchQuality::Exact))
        );
    }
}

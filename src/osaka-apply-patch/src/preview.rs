//! Unified diff rendering for dry runs.

use similar::TextDiff;
use std::path::Path;

/// Render a unified diff between two versions of `path`.
///
/// `None` stands for a file that does not exist on that side. Content that
/// is not valid UTF-8 is summarized instead of diffed.
pub fn render_diff(path: &Path, before: Option<&[u8]>, after: Option<&[u8]>) -> String {
    let display = path.display();
    let old_header = match before {
        Some(_) => format!("a/{display}"),
        None => "/dev/null".to_string(),
    };
    let new_header = match after {
        Some(_) => format!("b/{display}"),
        None => "/dev/null".to_string(),
    };

    let (Ok(old), Ok(new)) = (
        std::str::from_utf8(before.unwrap_or_default()),
        std::str::from_utf8(after.unwrap_or_default()),
    ) else {
        return format!("Binary files {old_header} and {new_header} differ\n");
    };

    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}

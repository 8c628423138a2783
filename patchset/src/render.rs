//! Human-readable rendering of file patches.

use crate::FileState;
use similar::TextDiff;
use std::path::Path;

/// Render a unified diff between two states of `path`.
///
/// Content that is not valid UTF-8 is reported as a binary change. Identical
/// states render as an empty string.
pub fn render_unified(path: &Path, before: &FileState, after: &FileState) -> String {
    if before == after {
        return String::new();
    }

    let old_header = match before {
        FileState::Absent => "/dev/null".to_string(),
        FileState::Present(_) => format!("a/{}", path.display()),
    };
    let new_header = match after {
        FileState::Absent => "/dev/null".to_string(),
        FileState::Present(_) => format!("b/{}", path.display()),
    };

    let (Ok(old), Ok(new)) = (
        std::str::from_utf8(before.bytes()),
        std::str::from_utf8(after.bytes()),
    ) else {
        return format!("Binary files {} and {} differ\n", old_header, new_header);
    };

    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}

//! Requirement extraction from free-text engine output.
//!
//! A line qualifies when it starts with a bullet/number marker, still has
//! more than five characters once the marker is removed, and carries none of
//! the template placeholders the engine tends to emit. Qualifying lines are
//! cleaned of the marker and bold markup and capped at `MAX_REQUIREMENTS`,
//! keeping source order. No qualifying line is a valid, empty result.

use regex::Regex;
use std::sync::LazyLock;

pub const MAX_REQUIREMENTS: usize = 5;

/// Lines containing any of these are template noise, not requirements.
const PLACEHOLDER_MARKERS: &[&str] = &["[Insert", "Date:"];

/// Content must be longer than this after the marker is stripped.
const MIN_CONTENT_CHARS: usize = 5;

static LEADING_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-•*\d.]+").unwrap());

static LEADING_MARKER_WITH_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-•*\d.]+\s*").unwrap());

/// Extract up to `MAX_REQUIREMENTS` cleaned requirement lines from `raw`.
pub fn extract(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| qualifies(line))
        .map(clean)
        .filter(|req| !req.is_empty())
        .take(MAX_REQUIREMENTS)
        .collect()
}

fn qualifies(line: &str) -> bool {
    if !LEADING_MARKER.is_match(line) {
        return false;
    }
    let content = LEADING_MARKER_WITH_SPACE.replace(line, "");
    if content.chars().count() <= MIN_CONTENT_CHARS {
        return false;
    }
    !PLACEHOLDER_MARKERS.iter().any(|marker| line.contains(marker))
}

fn clean(line: &str) -> String {
    LEADING_MARKER_WITH_SPACE
        .replace(line, "")
        .replace("**", "")
        .trim()
        .to_string()
}

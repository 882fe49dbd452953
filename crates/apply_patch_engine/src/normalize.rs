//! Cleanup applied to model-authored patch text before it reaches a parser.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::fs::PatchFs;
use crate::parser::{
    ADD_FILE_MARKER, END_PATCH_MARKER, EOF_MARKER, MOVE_TO_MARKER, UPDATE_FILE_MARKER,
};

fn heredoc_open_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"('|")?<<('|")EOF('|")"#).expect("valid heredoc regex"))
}

fn heredoc_close_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"\*\*\* End Patch\nEOF('|")?"#).expect("valid heredoc close regex")
    })
}

/// Remove a shell heredoc wrapper (`<<'EOF' ... EOF`) some models put around
/// the patch body, then trim surrounding whitespace.
pub fn strip_heredoc(patch: &str) -> String {
    let opened = heredoc_open_regex().replace(patch, "");
    let closed = heredoc_close_regex().replace(&opened, END_PATCH_MARKER);
    closed.trim().to_string()
}

/// Drop every `@@` hunk header line.
pub fn strip_hunk_headers(patch: &str) -> String {
    patch
        .split('\n')
        .filter(|line| !line.trim().starts_with("@@"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite `*** Update File:` sections whose target does not exist into
/// `*** Add File:` sections.
///
/// Inside a rewritten section added and context lines become file contents,
/// removed lines are dropped along with `*** Move to:` and `*** End of File`.
pub fn convert_missing_updates_to_adds(patch: &str, fs: &impl PatchFs) -> String {
    let mut converted = Vec::new();
    let mut in_missing_section = false;

    for line in patch.split('\n') {
        if let Some(path) = line.strip_prefix(UPDATE_FILE_MARKER) {
            let path = path.trim();
            in_missing_section = !fs.exists(Path::new(path));
            if in_missing_section {
                tracing::debug!(path, "update target missing; converting to add");
                converted.push(format!("{ADD_FILE_MARKER}{path}"));
            } else {
                converted.push(line.to_string());
            }
            continue;
        }
        if line.starts_with("***") && !line.starts_with(MOVE_TO_MARKER) && line != EOF_MARKER {
            in_missing_section = false;
        }
        if !in_missing_section {
            converted.push(line.to_string());
            continue;
        }

        if let Some(added) = line.strip_prefix('+') {
            converted.push(format!("+{added}"));
        } else if let Some(context) = line.strip_prefix(' ') {
            converted.push(format!("+{context}"));
        } else if line.is_empty() {
            converted.push("+".to_string());
        }
    }

    converted.join("\n")
}

/// Append `*** End Patch` when the text does not already end with it.
pub fn ensure_end_marker(patch: &str, marker: &str) -> String {
    if patch.ends_with(marker) {
        patch.to_string()
    } else {
        format!("{patch}\n{marker}")
    }
}

/// True when any line is a search/replace `SEARCH` marker.
pub fn is_search_replace_patch(patch: &str) -> bool {
    patch
        .lines()
        .any(|line| crate::search_replace::is_search_start(line.trim_end()))
}

//! Search/replace patch format.
//!
//! ```text
//! *** Begin Patch
//! *** Update File: src/lib.rs
//! ------- SEARCH
//! old text
//! =======
//! new text
//! +++++++ REPLACE
//! *** End Patch
//! ```
//!
//! Each block replaces the first occurrence of its search text. When no
//! verbatim occurrence exists, a window of lines that matches after trimming
//! every line is replaced instead.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::fs::PatchFs;
use crate::parser::UPDATE_FILE_MARKER;
use crate::IoError;

pub const SR_PATCH_PREFIX: &str = "*** Begin Patch\n";
pub const SR_PATCH_SUFFIX: &str = "\n*** End Patch";

const SEARCH_START: &str = "------- SEARCH";
const SEPARATOR: &str = "=======";
const REPLACE_END: &str = "+++++++ REPLACE";

#[derive(Debug, Error)]
pub enum SearchReplaceError {
    #[error("Patch must start with *** Begin Patch and end with *** End Patch")]
    InvalidEnvelope,
    #[error("SEARCH block did not match file content")]
    NoMatch { path: String },
    #[error("Unterminated SEARCH/REPLACE block in {path}")]
    UnterminatedBlock { path: String },
    #[error("Unexpected {marker} marker in {path}")]
    MisplacedMarker { path: String, marker: String },
    #[error(transparent)]
    Io(#[from] IoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplaceOp {
    pub search: String,
    pub replace: String,
}

impl SearchReplaceOp {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// Operations grouped by file, in the order files first appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOps {
    files: Vec<(String, Vec<SearchReplaceOp>)>,
}

impl FileOps {
    pub fn push(&mut self, path: impl Into<String>, op: SearchReplaceOp) {
        let path = path.into();
        self.ops_mut(&path).push(op);
    }

    pub fn get(&self, path: &str) -> Option<&[SearchReplaceOp]> {
        self.files
            .iter()
            .find(|(file, _)| file == path)
            .map(|(_, ops)| ops.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SearchReplaceOp])> {
        self.files
            .iter()
            .map(|(file, ops)| (file.as_str(), ops.as_slice()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(file, _)| file.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn ops_mut(&mut self, path: &str) -> &mut Vec<SearchReplaceOp> {
        let index = match self.files.iter().position(|(file, _)| file == path) {
            Some(index) => index,
            None => {
                self.files.push((path.to_string(), Vec::new()));
                self.files.len() - 1
            }
        };
        &mut self.files[index].1
    }

    /// Render back to patch text that [`parse_search_replace_patch`] reads
    /// into an identical value. Search and replace texts are expected to be
    /// newline-terminated, as parsing always produces them.
    pub fn to_patch_text(&self) -> String {
        let mut text = String::from(SR_PATCH_PREFIX);
        for (path, ops) in &self.files {
            text.push_str(UPDATE_FILE_MARKER);
            text.push_str(path);
            text.push('\n');
            for op in ops {
                text.push_str(SEARCH_START);
                text.push('\n');
                push_block(&mut text, &op.search);
                text.push_str(SEPARATOR);
                text.push('\n');
                push_block(&mut text, &op.replace);
                text.push_str(REPLACE_END);
                text.push('\n');
            }
        }
        text.push_str(END_PATCH);
        text
    }
}

const END_PATCH: &str = "*** End Patch";

fn push_block(text: &mut String, block: &str) {
    text.push_str(block);
    if !block.is_empty() && !block.ends_with('\n') {
        text.push('\n');
    }
}

fn marker_regexes() -> &'static [Regex; 3] {
    static REGEXES: OnceLock<[Regex; 3]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            Regex::new(r"^[-]{3,} SEARCH$").expect("valid search regex"),
            Regex::new(r"^[=]{3,}$").expect("valid separator regex"),
            Regex::new(r"^[+]{3,} REPLACE$").expect("valid replace regex"),
        ]
    })
}

pub(crate) fn is_search_start(line: &str) -> bool {
    marker_regexes()[0].is_match(line)
}

pub fn parse_search_replace_patch(text: &str) -> Result<FileOps, SearchReplaceError> {
    if !text.starts_with(SR_PATCH_PREFIX) || !text.ends_with(SR_PATCH_SUFFIX) {
        return Err(SearchReplaceError::InvalidEnvelope);
    }
    // Prefix and suffix share the newline in a patch with no body.
    let start = SR_PATCH_PREFIX.len();
    let end = text.len() - SR_PATCH_SUFFIX.len();
    let body = text.get(start..end).unwrap_or("");

    let [search_start, separator, replace_end] = marker_regexes();
    let mut ops = FileOps::default();
    let mut current_file: Option<String> = None;
    let mut in_search = false;
    let mut in_replace = false;
    let mut search = String::new();
    let mut replace = String::new();

    for line in body.split('\n') {
        if let Some(path) = line.strip_prefix(UPDATE_FILE_MARKER) {
            if let Some(file) = current_file.as_deref() {
                if in_search || in_replace {
                    return Err(unterminated(file));
                }
            }
            let path = path.trim().to_string();
            ops.ops_mut(&path);
            current_file = Some(path);
            continue;
        }
        let Some(file) = current_file.as_deref() else {
            continue;
        };

        if search_start.is_match(line) {
            if in_search || in_replace {
                return Err(unterminated(file));
            }
            in_search = true;
            search.clear();
            replace.clear();
        } else if separator.is_match(line) {
            if !in_search {
                return Err(misplaced(file, line));
            }
            in_search = false;
            in_replace = true;
        } else if replace_end.is_match(line) {
            if !in_replace {
                return Err(misplaced(file, line));
            }
            in_replace = false;
            ops.push(
                file,
                SearchReplaceOp::new(std::mem::take(&mut search), std::mem::take(&mut replace)),
            );
        } else if in_search {
            search.push_str(line);
            search.push('\n');
        } else if in_replace {
            replace.push_str(line);
            replace.push('\n');
        }
    }

    match current_file {
        Some(file) if in_search || in_replace => Err(unterminated(&file)),
        _ => Ok(ops),
    }
}

fn unterminated(path: &str) -> SearchReplaceError {
    SearchReplaceError::UnterminatedBlock {
        path: path.to_string(),
    }
}

fn misplaced(path: &str, line: &str) -> SearchReplaceError {
    SearchReplaceError::MisplacedMarker {
        path: path.to_string(),
        marker: line.trim().to_string(),
    }
}

/// Apply one operation to `content`, returning the new content.
pub fn apply_op(content: &str, op: &SearchReplaceOp) -> Option<String> {
    if let Some(index) = content.find(&op.search) {
        return Some(splice(content, index, index + op.search.len(), &op.replace));
    }

    // A block always ends in a newline; the file may not.
    if let Some(search) = op.search.strip_suffix('\n') {
        if !search.is_empty() && !content.ends_with('\n') && content.ends_with(search) {
            let start = content.len() - search.len();
            return Some(splice(content, start, content.len(), trim_final_newline(&op.replace)));
        }
    }

    let (start, end) = line_trimmed_match(content, &op.search)?;
    if end > content.len() {
        return Some(splice(content, start, content.len(), trim_final_newline(&op.replace)));
    }
    Some(splice(content, start, end, &op.replace))
}

/// Byte range of the first window of lines equal to the search lines once
/// both sides are trimmed. The range includes each line's newline, so it may
/// end one byte past the content when the last line has none.
fn line_trimmed_match(content: &str, search: &str) -> Option<(usize, usize)> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut search_lines: Vec<&str> = search.split('\n').collect();
    if search_lines.last() == Some(&"") {
        search_lines.pop();
    }
    if search_lines.len() > lines.len() {
        return None;
    }

    let width = search_lines.len();
    let found = (0..=lines.len() - width).find(|&index| {
        lines[index..index + width]
            .iter()
            .zip(&search_lines)
            .all(|(line, expected)| line.trim() == expected.trim())
    })?;

    let start: usize = lines[..found].iter().map(|line| line.len() + 1).sum();
    let span: usize = lines[found..found + width]
        .iter()
        .map(|line| line.len() + 1)
        .sum();
    Some((start, start + span))
}

fn trim_final_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

fn splice(content: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut spliced = String::with_capacity(content.len() + replacement.len());
    spliced.push_str(&content[..start]);
    spliced.push_str(replacement);
    spliced.push_str(&content[end..]);
    spliced
}

/// Parse and apply a search/replace patch.
///
/// A missing file reads as empty. Every operation for a file is applied in
/// memory before the file is written once; a failing block leaves that file
/// untouched, though files earlier in the patch stay written.
pub fn apply_search_replace_patch(
    text: &str,
    fs: &mut impl PatchFs,
) -> Result<String, SearchReplaceError> {
    let ops = parse_search_replace_patch(text)?;
    for (path, file_ops) in ops.iter() {
        let target = Path::new(path);
        let mut content = fs.read(target).unwrap_or_default();
        for op in file_ops {
            content = apply_op(&content, op).ok_or_else(|| {
                tracing::debug!(path, "search block did not match");
                SearchReplaceError::NoMatch {
                    path: path.to_string(),
                }
            })?;
        }
        fs.write(target, &content)
            .map_err(|source| IoError::new(format!("Failed to write file {path}"), source))?;
    }
    Ok("Done!".to_string())
}

//! Patch engine for model-authored file edits.
//!
//! Two formats are supported, both framed by `*** Begin Patch` and
//! `*** End Patch`: a full-context format of add/delete/update sections with
//! `+`/`-`/context lines, and a search/replace format of
//! `SEARCH`/`=======`/`REPLACE` blocks.

mod exec;
mod fs;
mod normalize;
mod parser;
mod search_replace;
mod seek_sequence;

use std::io::Write;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use thiserror::Error;

pub use exec::{
    exec_any_patch, exec_apply_patch, exec_apply_patch_sr, patch_preview, patch_target_paths,
    PatchExecResult,
};
pub use fs::{DiskFs, MemoryFs, PatchFs};
pub use normalize::{
    convert_missing_updates_to_adds, ensure_end_marker, is_search_replace_patch, strip_heredoc,
    strip_hunk_headers,
};
pub use parser::{parse_patch, Hunk, ParseError, UpdateFileChunk};
pub use search_replace::{
    apply_op, apply_search_replace_patch, parse_search_replace_patch, FileOps, SearchReplaceError,
    SearchReplaceOp, SR_PATCH_PREFIX, SR_PATCH_SUFFIX,
};

/// Instructions appended to the system prompt of models that are trained to
/// emit the full-context format through an `apply_patch` command.
pub const APPLY_PATCH_TOOL_INSTRUCTIONS: &str = include_str!("../apply_patch_tool_instructions.md");

#[derive(Debug, Error)]
pub enum ApplyPatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("{0}")]
    ComputeReplacements(String),
    #[error("No files were modified.")]
    Empty,
}

#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct IoError {
    context: String,
    #[source]
    source: std::io::Error,
}

impl IoError {
    pub fn new(context: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> std::io::ErrorKind {
        self.source.kind()
    }
}

/// Files touched by a successful patch, grouped by change kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectedPaths {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

/// Apply a full-context patch to the real filesystem, printing a summary to
/// `stdout` on success or the error to `stderr` on failure.
pub fn apply_patch(
    patch: &str,
    stdout: &mut impl Write,
    stderr: &mut impl Write,
) -> Result<AffectedPaths, ApplyPatchError> {
    let mut fs = DiskFs::default();
    match apply_patch_with(patch, &mut fs) {
        Ok(affected) => {
            print_summary(&affected, stdout).map_err(|source| IoError::new("stdout", source))?;
            Ok(affected)
        }
        Err(error) => {
            writeln!(stderr, "{error}").map_err(|source| IoError::new("stderr", source))?;
            Err(error)
        }
    }
}

/// Parse `patch` and apply its hunks in order through `fs`.
///
/// Hunks are committed one at a time, so a failure leaves earlier hunks
/// applied.
pub fn apply_patch_with(
    patch: &str,
    fs: &mut impl PatchFs,
) -> Result<AffectedPaths, ApplyPatchError> {
    let hunks = parse_patch(patch)?;
    apply_hunks(&hunks, fs)
}

pub fn apply_hunks(
    hunks: &[Hunk],
    fs: &mut impl PatchFs,
) -> Result<AffectedPaths, ApplyPatchError> {
    if hunks.is_empty() {
        return Err(ApplyPatchError::Empty);
    }

    let mut affected = AffectedPaths::default();
    for hunk in hunks {
        match hunk {
            Hunk::AddFile { path, contents } => {
                fs.write(path, contents).map_err(|source| {
                    IoError::new(format!("Failed to write file {}", path.display()), source)
                })?;
                affected.added.push(path.clone());
            }
            Hunk::DeleteFile { path } => {
                fs.remove(path).map_err(|source| {
                    IoError::new(format!("Failed to delete file {}", path.display()), source)
                })?;
                affected.deleted.push(path.clone());
            }
            Hunk::UpdateFile {
                path,
                move_path,
                chunks,
            } => {
                let (_, new_contents) = derive_new_contents(&*fs, path, chunks)?;
                let destination = move_path.as_ref().unwrap_or(path);
                fs.write(destination, &new_contents).map_err(|source| {
                    IoError::new(
                        format!("Failed to write file {}", destination.display()),
                        source,
                    )
                })?;
                if move_path.is_some() {
                    fs.remove(path).map_err(|source| {
                        IoError::new(
                            format!("Failed to remove original {}", path.display()),
                            source,
                        )
                    })?;
                }
                affected.modified.push(destination.clone());
            }
        }
    }
    tracing::debug!(
        added = affected.added.len(),
        modified = affected.modified.len(),
        deleted = affected.deleted.len(),
        "patch applied"
    );
    Ok(affected)
}

/// Original and patched contents of the file at `path`.
fn derive_new_contents(
    fs: &impl PatchFs,
    path: &Path,
    chunks: &[UpdateFileChunk],
) -> Result<(String, String), ApplyPatchError> {
    let original = fs.read(path).map_err(|source| {
        IoError::new(
            format!("Failed to read file to update {}", path.display()),
            source,
        )
    })?;

    let mut lines: Vec<String> = original.split('\n').map(String::from).collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    let replacements = compute_replacements(&lines, path, chunks)?;
    let mut lines = apply_replacements(lines, &replacements);
    if !lines.last().is_some_and(String::is_empty) {
        lines.push(String::new());
    }
    Ok((original, lines.join("\n")))
}

type Replacement = (usize, usize, Vec<String>);

fn compute_replacements(
    lines: &[String],
    path: &Path,
    chunks: &[UpdateFileChunk],
) -> Result<Vec<Replacement>, ApplyPatchError> {
    let mut replacements = Vec::new();
    let mut cursor = 0;

    for chunk in chunks {
        if let Some(context) = &chunk.change_context {
            let found =
                seek_sequence::seek_sequence(lines, std::slice::from_ref(context), cursor, false)
                    .ok_or_else(|| {
                        ApplyPatchError::ComputeReplacements(format!(
                            "Failed to find context '{context}' in {}",
                            path.display()
                        ))
                    })?;
            cursor = found + 1;
        }

        if chunk.old_lines.is_empty() {
            replacements.push((lines.len(), 0, chunk.new_lines.clone()));
            continue;
        }

        let mut pattern = chunk.old_lines.as_slice();
        let mut new_lines = chunk.new_lines.as_slice();
        let mut found = seek_sequence::seek_sequence(lines, pattern, cursor, chunk.is_end_of_file);

        // A trailing empty old line stands for the file's final newline,
        // which was dropped when splitting.
        if found.is_none() && pattern.last().is_some_and(String::is_empty) {
            pattern = &pattern[..pattern.len() - 1];
            if new_lines.last().is_some_and(String::is_empty) {
                new_lines = &new_lines[..new_lines.len() - 1];
            }
            found = seek_sequence::seek_sequence(lines, pattern, cursor, chunk.is_end_of_file);
        }

        let start = found.ok_or_else(|| {
            ApplyPatchError::ComputeReplacements(format!(
                "Failed to find expected lines in {}:\n{}",
                path.display(),
                chunk.old_lines.join("\n")
            ))
        })?;
        replacements.push((start, pattern.len(), new_lines.to_vec()));
        cursor = start + pattern.len();
    }

    replacements.sort_by_key(|(start, _, _)| *start);
    Ok(replacements)
}

/// Splice replacements from the bottom up so earlier indices stay valid.
fn apply_replacements(mut lines: Vec<String>, replacements: &[Replacement]) -> Vec<String> {
    for (start, old_len, new_lines) in replacements.iter().rev() {
        let end = (start + old_len).min(lines.len());
        let start = (*start).min(end);
        lines.splice(start..end, new_lines.iter().cloned());
    }
    lines
}

/// Unified diff (one line of context) between the file at `path` and its
/// contents after `chunks` are applied.
pub fn unified_diff(
    fs: &impl PatchFs,
    path: &Path,
    chunks: &[UpdateFileChunk],
) -> Result<String, ApplyPatchError> {
    let (original, new_contents) = derive_new_contents(fs, path, chunks)?;
    let label = path.display().to_string();
    let diff = TextDiff::from_lines(&original, &new_contents)
        .unified_diff()
        .context_radius(1)
        .header(&label, &label)
        .to_string();
    Ok(diff)
}

pub fn print_summary(affected: &AffectedPaths, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "Success. Updated the following files:")?;
    for path in &affected.added {
        writeln!(out, "A {}", path.display())?;
    }
    for path in &affected.modified {
        writeln!(out, "M {}", path.display())?;
    }
    for path in &affected.deleted {
        writeln!(out, "D {}", path.display())?;
    }
    Ok(())
}

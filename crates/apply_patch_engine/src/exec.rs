//! Entry points used by the agent's exec layer: normalize model-authored
//! patch text, apply it relative to a working directory and report the
//! outcome the way a process would.

use std::path::{Path, PathBuf};

use crate::fs::DiskFs;
use crate::normalize::{
    convert_missing_updates_to_adds, ensure_end_marker, is_search_replace_patch, strip_heredoc,
    strip_hunk_headers,
};
use crate::parser::{
    ADD_FILE_MARKER, DELETE_FILE_MARKER, END_PATCH_MARKER, MOVE_TO_MARKER, UPDATE_FILE_MARKER,
};
use crate::search_replace::apply_search_replace_patch;
use crate::{apply_patch_with, parse_patch, print_summary, unified_diff, Hunk};

/// Process-style result of applying a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl PatchExecResult {
    fn success(stdout: String) -> Self {
        Self {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn failure(stderr: String) -> Self {
        Self {
            stdout: String::new(),
            stderr,
            exit_code: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Apply a full-context patch after normalizing it. Update sections whose
/// file is missing are turned into adds.
pub fn exec_apply_patch(patch_text: &str, workdir: Option<&Path>) -> PatchExecResult {
    let mut fs = DiskFs::new(workdir);
    let input = strip_hunk_headers(&strip_heredoc(patch_text));
    let input = convert_missing_updates_to_adds(&input, &fs);
    let input = ensure_end_marker(&input, END_PATCH_MARKER);
    tracing::debug!(patch = %input, "applying patch");

    match apply_patch_with(&input, &mut fs) {
        Ok(affected) => {
            let mut summary = Vec::new();
            match print_summary(&affected, &mut summary) {
                Ok(()) => PatchExecResult::success(String::from_utf8_lossy(&summary).into_owned()),
                Err(error) => PatchExecResult::failure(error.to_string()),
            }
        }
        Err(error) => {
            tracing::debug!(%error, "patch failed");
            PatchExecResult::failure(error.to_string())
        }
    }
}

/// Apply a search/replace patch after stripping any heredoc wrapper.
pub fn exec_apply_patch_sr(patch_text: &str, workdir: Option<&Path>) -> PatchExecResult {
    let mut fs = DiskFs::new(workdir);
    let input = ensure_end_marker(&strip_heredoc(patch_text), END_PATCH_MARKER);
    tracing::debug!(patch = %input, "applying search/replace patch");

    match apply_search_replace_patch(&input, &mut fs) {
        Ok(stdout) => PatchExecResult::success(stdout),
        Err(error) => {
            tracing::debug!(%error, "search/replace patch failed");
            PatchExecResult::failure(error.to_string())
        }
    }
}

/// Pick the engine matching the patch's format.
pub fn exec_any_patch(patch_text: &str, workdir: Option<&Path>) -> PatchExecResult {
    if is_search_replace_patch(patch_text) {
        exec_apply_patch_sr(patch_text, workdir)
    } else {
        exec_apply_patch(patch_text, workdir)
    }
}

/// Every path a patch would write or delete, resolved against `workdir`.
pub fn patch_target_paths(patch_text: &str, workdir: Option<&Path>) -> Vec<PathBuf> {
    let fs = DiskFs::new(workdir);
    let markers = [
        ADD_FILE_MARKER,
        DELETE_FILE_MARKER,
        UPDATE_FILE_MARKER,
        MOVE_TO_MARKER,
    ];
    patch_text
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            markers
                .iter()
                .find_map(|marker| line.strip_prefix(marker))
                .map(|path| fs.resolve(Path::new(path.trim())))
        })
        .collect()
}

/// Human-readable preview of a full-context patch: a unified diff per
/// updated file and the list of added and deleted paths. Falls back to the
/// raw text when the patch cannot be previewed.
pub fn patch_preview(patch_text: &str, workdir: Option<&Path>) -> String {
    if is_search_replace_patch(patch_text) {
        return patch_text.to_string();
    }
    let fs = DiskFs::new(workdir);
    let normalized = ensure_end_marker(
        &strip_hunk_headers(&strip_heredoc(patch_text)),
        END_PATCH_MARKER,
    );
    let Ok(hunks) = parse_patch(&normalized) else {
        return patch_text.to_string();
    };

    let mut preview = String::new();
    for hunk in &hunks {
        match hunk {
            Hunk::AddFile { path, .. } => {
                preview.push_str(&format!("A {}\n", path.display()));
            }
            Hunk::DeleteFile { path } => {
                preview.push_str(&format!("D {}\n", path.display()));
            }
            Hunk::UpdateFile { path, chunks, .. } => match unified_diff(&fs, path, chunks) {
                Ok(diff) => preview.push_str(&diff),
                Err(_) => preview.push_str(&format!("M {}\n", path.display())),
            },
        }
    }
    preview
}

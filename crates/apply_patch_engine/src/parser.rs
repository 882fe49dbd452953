//! Parser for the full-context patch format.
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path/new.txt
//! +contents
//! *** Delete File: path/old.txt
//! *** Update File: path/src.txt
//! *** Move to: path/dst.txt
//! @@ optional context line
//!  unchanged
//! -removed
//! +added
//! *** End of File
//! *** End Patch
//! ```

use std::path::PathBuf;

use thiserror::Error;

pub const BEGIN_PATCH_MARKER: &str = "*** Begin Patch";
pub const END_PATCH_MARKER: &str = "*** End Patch";
pub const ADD_FILE_MARKER: &str = "*** Add File: ";
pub const DELETE_FILE_MARKER: &str = "*** Delete File: ";
pub const UPDATE_FILE_MARKER: &str = "*** Update File: ";
pub const MOVE_TO_MARKER: &str = "*** Move to: ";
pub const EOF_MARKER: &str = "*** End of File";
const CHANGE_CONTEXT_MARKER: &str = "@@ ";
const EMPTY_CHANGE_CONTEXT_MARKER: &str = "@@";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
    #[error("invalid hunk at line {line_number}, {message}")]
    InvalidHunk { message: String, line_number: usize },
}

/// One file-level operation of a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hunk {
    AddFile {
        path: PathBuf,
        contents: String,
    },
    DeleteFile {
        path: PathBuf,
    },
    UpdateFile {
        path: PathBuf,
        move_path: Option<PathBuf>,
        chunks: Vec<UpdateFileChunk>,
    },
}

impl Hunk {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::AddFile { path, .. } | Self::DeleteFile { path } | Self::UpdateFile { path, .. } => {
                path
            }
        }
    }
}

/// A contiguous run of context, removed and added lines inside an update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateFileChunk {
    /// Line named by an `@@ <line>` header, located before `old_lines`.
    pub change_context: Option<String>,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
    pub is_end_of_file: bool,
}

pub fn parse_patch(patch: &str) -> Result<Vec<Hunk>, ParseError> {
    let lines: Vec<&str> = patch.trim().lines().collect();
    let body = match lines.as_slice() {
        [first, body @ .., last] => {
            if first.trim() != BEGIN_PATCH_MARKER {
                return Err(ParseError::InvalidPatch(format!(
                    "The first line of the patch must be '{BEGIN_PATCH_MARKER}'"
                )));
            }
            if last.trim() != END_PATCH_MARKER {
                return Err(ParseError::InvalidPatch(format!(
                    "The last line of the patch must be '{END_PATCH_MARKER}'"
                )));
            }
            body
        }
        _ => {
            return Err(ParseError::InvalidPatch(format!(
                "The patch must be enclosed in '{BEGIN_PATCH_MARKER}' and '{END_PATCH_MARKER}'"
            )))
        }
    };

    let mut hunks = Vec::new();
    let mut index = 0;
    while index < body.len() {
        if body[index].trim().is_empty() {
            index += 1;
            continue;
        }
        // Line numbers are 1-based and the begin marker is line 1.
        let (hunk, consumed) = parse_one_hunk(&body[index..], index + 2)?;
        hunks.push(hunk);
        index += consumed;
    }

    Ok(hunks)
}

fn parse_one_hunk(lines: &[&str], line_number: usize) -> Result<(Hunk, usize), ParseError> {
    let header = lines[0].trim();

    if let Some(path) = header.strip_prefix(ADD_FILE_MARKER) {
        let mut contents = String::new();
        let mut consumed = 1;
        for line in &lines[1..] {
            let Some(added) = line.strip_prefix('+') else {
                break;
            };
            contents.push_str(added);
            contents.push('\n');
            consumed += 1;
        }
        return Ok((
            Hunk::AddFile {
                path: PathBuf::from(path),
                contents,
            },
            consumed,
        ));
    }

    if let Some(path) = header.strip_prefix(DELETE_FILE_MARKER) {
        return Ok((
            Hunk::DeleteFile {
                path: PathBuf::from(path),
            },
            1,
        ));
    }

    if let Some(path) = header.strip_prefix(UPDATE_FILE_MARKER) {
        let mut remaining = &lines[1..];
        let mut consumed = 1;

        let move_path = remaining
            .first()
            .and_then(|line| line.strip_prefix(MOVE_TO_MARKER))
            .map(PathBuf::from);
        if move_path.is_some() {
            remaining = &remaining[1..];
            consumed += 1;
        }

        let mut chunks = Vec::new();
        while let Some(line) = remaining.first() {
            if line.trim().is_empty() {
                remaining = &remaining[1..];
                consumed += 1;
                continue;
            }
            if line.starts_with("***") {
                break;
            }

            let (chunk, used) =
                parse_update_chunk(remaining, line_number + consumed, chunks.is_empty())?;
            chunks.push(chunk);
            remaining = &remaining[used..];
            consumed += used;
        }

        if chunks.is_empty() {
            return Err(ParseError::InvalidHunk {
                message: format!("Update file hunk for path '{path}' is empty"),
                line_number,
            });
        }

        return Ok((
            Hunk::UpdateFile {
                path: PathBuf::from(path),
                move_path,
                chunks,
            },
            consumed,
        ));
    }

    Err(ParseError::InvalidHunk {
        message: format!(
            "'{header}' is not a valid hunk header. Valid hunk headers: '*** Add File: {{path}}', '*** Delete File: {{path}}', '*** Update File: {{path}}'"
        ),
        line_number,
    })
}

fn parse_update_chunk(
    lines: &[&str],
    line_number: usize,
    allow_missing_context: bool,
) -> Result<(UpdateFileChunk, usize), ParseError> {
    let (change_context, start) = if lines[0] == EMPTY_CHANGE_CONTEXT_MARKER {
        (None, 1)
    } else if let Some(context) = lines[0].strip_prefix(CHANGE_CONTEXT_MARKER) {
        (Some(context.to_string()), 1)
    } else if allow_missing_context {
        (None, 0)
    } else {
        return Err(ParseError::InvalidHunk {
            message: format!(
                "Expected update hunk to start with a @@ context marker, got: '{}'",
                lines[0]
            ),
            line_number,
        });
    };

    if start >= lines.len() {
        return Err(ParseError::InvalidHunk {
            message: "Update hunk does not contain any lines".to_string(),
            line_number: line_number + 1,
        });
    }

    let mut chunk = UpdateFileChunk {
        change_context,
        ..UpdateFileChunk::default()
    };
    let mut parsed = 0;
    for line in &lines[start..] {
        if *line == EOF_MARKER {
            if parsed == 0 {
                return Err(ParseError::InvalidHunk {
                    message: "Update hunk does not contain any lines".to_string(),
                    line_number: line_number + 1,
                });
            }
            chunk.is_end_of_file = true;
            parsed += 1;
            break;
        }

        match line.chars().next() {
            // Models often drop the leading space of an empty context line.
            None => {
                chunk.old_lines.push(String::new());
                chunk.new_lines.push(String::new());
            }
            Some(' ') => {
                chunk.old_lines.push(line[1..].to_string());
                chunk.new_lines.push(line[1..].to_string());
            }
            Some('+') => chunk.new_lines.push(line[1..].to_string()),
            Some('-') => chunk.old_lines.push(line[1..].to_string()),
            Some(_) => {
                if parsed == 0 {
                    return Err(ParseError::InvalidHunk {
                        message: format!(
                            "Unexpected line found in update hunk: '{line}'. Every line should start with ' ' (context line), '+' (added line), or '-' (removed line)"
                        ),
                        line_number: line_number + 1,
                    });
                }
                break;
            }
        }
        parsed += 1;
    }

    Ok((chunk, parsed + start))
}

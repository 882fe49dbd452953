use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use agent_protocol::ResponseItem;
use apply_patch_engine::{exec_any_patch, patch_preview, patch_target_paths, PatchExecResult};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

use crate::approval::{
    assess_command, assess_patch, CommandConfirmation, PatchDetails, ReviewDecision,
    SafetyAssessment,
};
use crate::exec::{ExecCollaborator, ExecContext, ExecMetadata, ExecOutcome, ExecRequest};
use crate::lock_unpoisoned;
use crate::parsers::contains_shell_operator;

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024;
const DEFAULT_DENY_MESSAGE: &str = "No, don't do that, keep going though.";
const ABORTED_OUTPUT: &str = "aborted";

/// Runs commands as local child processes and applies patches in-process.
#[derive(Debug)]
pub struct LocalExec {
    default_timeout: Duration,
    max_output_bytes: usize,
    session_approvals: Mutex<HashSet<Vec<String>>>,
}

impl Default for LocalExec {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_EXEC_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            session_approvals: Mutex::new(HashSet::new()),
        }
    }
}

impl LocalExec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    fn is_approved_for_session(&self, command: &[String]) -> bool {
        lock_unpoisoned(&self.session_approvals).contains(command)
    }

    async fn review(
        &self,
        command: &[String],
        patch: Option<&PatchDetails>,
        ctx: &ExecContext,
    ) -> CommandConfirmation {
        let confirmation = ctx.confirm.confirm(command, patch).await;
        if confirmation.decision == ReviewDecision::ApproveForSession {
            lock_unpoisoned(&self.session_approvals).insert(command.to_vec());
        }
        confirmation
    }

    async fn exec_patch(
        &self,
        request: &ExecRequest,
        patch: &str,
        ctx: &ExecContext,
    ) -> ExecOutcome {
        let workdir = request.workdir.as_deref().map(Path::new);
        let base = match workdir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().unwrap_or_default(),
        };
        let targets = patch_target_paths(patch, workdir);
        let assessment = assess_patch(
            &targets,
            ctx.approval_policy,
            &base,
            &ctx.additional_writable_roots,
        );

        if assessment == SafetyAssessment::AskUser
            && !self.is_approved_for_session(&request.command)
        {
            let details = PatchDetails {
                patch: patch.to_string(),
                preview: patch_preview(patch, workdir),
            };
            let confirmation = self.review(&request.command, Some(&details), ctx).await;
            if !confirmation.is_approved() {
                return denied(confirmation);
            }
        }

        let started = Instant::now();
        let patch_text = patch.to_string();
        let patch_dir = workdir.map(Path::to_path_buf);
        let result = tokio::task::spawn_blocking(move || {
            exec_any_patch(&patch_text, patch_dir.as_deref())
        })
        .await
        .unwrap_or_else(|error| PatchExecResult {
            stdout: String::new(),
            stderr: format!("patch task failed: {error}"),
            exit_code: 1,
        });
        tracing::debug!(
            exit_code = result.exit_code,
            files = targets.len(),
            "applied patch"
        );
        let text = if result.stdout.is_empty() {
            result.stderr
        } else {
            result.stdout
        };
        self.finish(text, result.exit_code, started)
    }

    async fn exec_command(&self, request: &ExecRequest, ctx: &ExecContext) -> ExecOutcome {
        if assess_command(&request.command, ctx.approval_policy) == SafetyAssessment::AskUser
            && !self.is_approved_for_session(&request.command)
        {
            let confirmation = self.review(&request.command, None, ctx).await;
            if !confirmation.is_approved() {
                return denied(confirmation);
            }
        }

        self.spawn(request, ctx).await
    }

    async fn spawn(&self, request: &ExecRequest, ctx: &ExecContext) -> ExecOutcome {
        let started = Instant::now();
        let Some((program, args)) = request.command.split_first() else {
            return self.finish("command is empty".to_string(), 1, started);
        };

        let mut command = if args.is_empty() && contains_shell_operator(program) {
            let mut shell = Command::new("sh");
            shell.arg("-c").arg(program);
            shell
        } else {
            let mut direct = Command::new(program);
            direct.args(args);
            direct
        };
        if let Some(workdir) = &request.workdir {
            command.current_dir(PathBuf::from(workdir));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!(%program, %error, "failed to spawn command");
                return self.finish(format!("Failed to launch {program}: {error}"), 1, started);
            }
        };

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        tracing::debug!(%program, timeout_ms = timeout.as_millis() as u64, "spawned command");

        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    let text = if stdout.is_empty() {
                        String::from_utf8_lossy(&output.stderr).into_owned()
                    } else {
                        stdout
                    };
                    self.finish(text, output.status.code().unwrap_or(1), started)
                }
                Err(error) => self.finish(format!("Failed waiting for {program}: {error}"), 1, started),
            },
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(%program, timeout_ms = timeout.as_millis() as u64, "command timed out");
                self.finish(
                    format!("command timed out after {} ms", timeout.as_millis()),
                    1,
                    started,
                )
            }
            () = ctx.cancel.cancelled() => self.finish(ABORTED_OUTPUT.to_string(), 1, started),
        }
    }

    fn finish(&self, text: String, exit_code: i32, started: Instant) -> ExecOutcome {
        let seconds = started.elapsed().as_secs_f64();
        ExecOutcome::new(
            truncate_to_byte_limit(text, self.max_output_bytes),
            ExecMetadata {
                exit_code,
                duration_seconds: (seconds * 10.0).round() / 10.0,
            },
        )
    }
}

#[async_trait]
impl ExecCollaborator for LocalExec {
    async fn exec(&self, request: ExecRequest, ctx: &ExecContext) -> ExecOutcome {
        if ctx.cancel.is_cancelled() {
            return ExecOutcome::new(ABORTED_OUTPUT, ExecMetadata::failed());
        }

        match request.patch_text() {
            Some(patch) => self.exec_patch(&request, patch, ctx).await,
            None => self.exec_command(&request, ctx).await,
        }
    }
}

fn denied(confirmation: CommandConfirmation) -> ExecOutcome {
    let reason = confirmation
        .deny_reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string());
    let mut outcome = ExecOutcome::new(ABORTED_OUTPUT, ExecMetadata::failed());
    outcome.additional_items.push(ResponseItem::user_text(reason));
    outcome
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

//! Approval policy and the confirmation seam used before running commands.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

/// How much the agent may do without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPolicy {
    /// Only known read-only commands run without confirmation.
    #[default]
    Suggest,
    /// Patches confined to writable roots are applied without asking.
    AutoEdit,
    /// Every command runs without confirmation.
    FullAuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Deny,
    ApproveForSession,
}

/// Answer returned by a [`ConfirmationHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfirmation {
    pub decision: ReviewDecision,
    pub deny_reason: Option<String>,
}

impl CommandConfirmation {
    pub fn approve() -> Self {
        Self {
            decision: ReviewDecision::Approve,
            deny_reason: None,
        }
    }

    pub fn deny(reason: Option<String>) -> Self {
        Self {
            decision: ReviewDecision::Deny,
            deny_reason: reason,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(
            self.decision,
            ReviewDecision::Approve | ReviewDecision::ApproveForSession
        )
    }
}

/// Patch a command would apply, shown alongside the confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDetails {
    pub patch: String,
    /// Rendered diff of the patch against the current files.
    pub preview: String,
}

/// Asked once per undecided tool call.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, command: &[String], patch: Option<&PatchDetails>)
        -> CommandConfirmation;
}

/// Handler that always gives the same answer.
#[derive(Debug, Clone)]
pub struct StaticConfirmation(pub CommandConfirmation);

impl StaticConfirmation {
    pub fn approve() -> Self {
        Self(CommandConfirmation::approve())
    }

    pub fn deny() -> Self {
        Self(CommandConfirmation::deny(None))
    }
}

#[async_trait]
impl ConfirmationHandler for StaticConfirmation {
    async fn confirm(
        &self,
        _command: &[String],
        _patch: Option<&PatchDetails>,
    ) -> CommandConfirmation {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyAssessment {
    AutoApprove,
    AskUser,
}

pub fn assess_command(command: &[String], policy: ApprovalPolicy) -> SafetyAssessment {
    if policy == ApprovalPolicy::FullAuto || is_known_read_only(command) {
        SafetyAssessment::AutoApprove
    } else {
        SafetyAssessment::AskUser
    }
}

/// Patches are auto-approved outside `Suggest` when every target stays
/// inside `workdir` or one of `writable_roots`.
pub fn assess_patch(
    targets: &[PathBuf],
    policy: ApprovalPolicy,
    workdir: &Path,
    writable_roots: &[PathBuf],
) -> SafetyAssessment {
    if policy == ApprovalPolicy::Suggest {
        return SafetyAssessment::AskUser;
    }

    let roots: Vec<PathBuf> = std::iter::once(workdir)
        .chain(writable_roots.iter().map(PathBuf::as_path))
        .map(|root| normalize_path(&workdir.join(root)))
        .collect();
    let confined = targets.iter().all(|target| {
        let target = normalize_path(&workdir.join(target));
        roots.iter().any(|root| target.starts_with(root))
    });

    if confined {
        SafetyAssessment::AutoApprove
    } else {
        SafetyAssessment::AskUser
    }
}

const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "pwd", "echo", "rg", "grep", "head", "tail", "wc", "true",
];
const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &["status", "diff", "log", "show"];
const UNSAFE_FIND_OPTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint"];

pub fn is_known_read_only(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    match program.as_str() {
        "find" => !args
            .iter()
            .any(|arg| UNSAFE_FIND_OPTIONS.contains(&arg.as_str())),
        "git" => args
            .first()
            .is_some_and(|sub| READ_ONLY_GIT_SUBCOMMANDS.contains(&sub.as_str())),
        other => READ_ONLY_COMMANDS.contains(&other),
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

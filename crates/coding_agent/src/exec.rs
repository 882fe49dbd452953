//! Contract between the tool dispatcher and whatever actually runs commands.

use std::path::PathBuf;
use std::sync::Arc;

use agent_protocol::ResponseItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalPolicy, ConfirmationHandler};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub workdir: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl ExecRequest {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// `["apply_patch", <patch>]` invocation for the given patch text.
    pub fn apply_patch(patch: impl Into<String>, workdir: Option<String>) -> Self {
        Self {
            command: vec![APPLY_PATCH_COMMAND.to_string(), patch.into()],
            workdir,
            timeout_ms: None,
        }
    }

    /// Patch text when this request is an `apply_patch` invocation.
    pub fn patch_text(&self) -> Option<&str> {
        match self.command.as_slice() {
            [program, patch] if program == APPLY_PATCH_COMMAND => Some(patch),
            _ => None,
        }
    }
}

pub const APPLY_PATCH_COMMAND: &str = "apply_patch";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecMetadata {
    pub exit_code: i32,
    pub duration_seconds: f64,
}

impl ExecMetadata {
    pub fn failed() -> Self {
        Self {
            exit_code: 1,
            duration_seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    pub output_text: String,
    pub metadata: ExecMetadata,
    /// Items to inject into the conversation after the tool output.
    pub additional_items: Vec<ResponseItem>,
}

impl ExecOutcome {
    pub fn new(output_text: impl Into<String>, metadata: ExecMetadata) -> Self {
        Self {
            output_text: output_text.into(),
            metadata,
            additional_items: Vec::new(),
        }
    }
}

/// Per-call context handed to an [`ExecCollaborator`].
#[derive(Clone)]
pub struct ExecContext {
    pub approval_policy: ApprovalPolicy,
    pub additional_writable_roots: Vec<PathBuf>,
    pub confirm: Arc<dyn ConfirmationHandler>,
    /// Cancelled when the owning run is cancelled; replaced for each run.
    pub cancel: CancellationToken,
}

/// Runs commands requested by the model.
///
/// Ordinary command failure is reported through [`ExecMetadata::exit_code`];
/// implementations never fail the call itself.
#[async_trait]
pub trait ExecCollaborator: Send + Sync {
    async fn exec(&self, request: ExecRequest, ctx: &ExecContext) -> ExecOutcome;
}

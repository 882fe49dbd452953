use std::path::PathBuf;
use std::time::Duration;

use crate::approval::ApprovalPolicy;
use crate::retry::DEFAULT_RATE_LIMIT_RETRY_WAIT;

pub const ENV_RATE_LIMIT_RETRY_WAIT_MS: &str = "OPENAI_RATE_LIMIT_RETRY_WAIT_MS";
pub const DEFAULT_MODEL: &str = "codex-mini-latest";
pub const DEFAULT_REASONING_EFFORT: &str = "medium";

/// Settings that shape every request an [`crate::AgentLoop`] sends.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    /// User instructions appended after the built-in prefix.
    pub instructions: String,
    /// Resend the full transcript on every request instead of relying on
    /// server-side storage.
    pub disable_response_storage: bool,
    pub approval_policy: ApprovalPolicy,
    pub additional_writable_roots: Vec<PathBuf>,
    pub rate_limit_retry_wait: Duration,
    pub reasoning_effort: String,
    pub flex_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instructions: String::new(),
            disable_response_storage: false,
            approval_policy: ApprovalPolicy::default(),
            additional_writable_roots: Vec::new(),
            rate_limit_retry_wait: DEFAULT_RATE_LIMIT_RETRY_WAIT,
            reasoning_effort: DEFAULT_REASONING_EFFORT.to_string(),
            flex_mode: false,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    #[must_use]
    pub fn with_disable_response_storage(mut self, disable: bool) -> Self {
        self.disable_response_storage = disable;
        self
    }

    #[must_use]
    pub fn with_approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    #[must_use]
    pub fn with_additional_writable_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.additional_writable_roots = roots;
        self
    }

    #[must_use]
    pub fn with_rate_limit_retry_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_retry_wait = wait;
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = effort.into();
        self
    }

    #[must_use]
    pub fn with_flex_mode(mut self, flex_mode: bool) -> Self {
        self.flex_mode = flex_mode;
        self
    }

    /// Applies `OPENAI_RATE_LIMIT_RETRY_WAIT_MS` when it holds an integer.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let wait = lookup(ENV_RATE_LIMIT_RETRY_WAIT_MS)
            .and_then(|value| value.trim().parse::<u64>().ok());
        if let Some(wait) = wait {
            self.rate_limit_retry_wait = Duration::from_millis(wait);
        }
        self
    }

    pub(crate) fn uses_local_shell_tool(&self) -> bool {
        self.model.starts_with("codex")
    }

    pub(crate) fn uses_reasoning(&self) -> bool {
        self.model.starts_with('o') || self.model.starts_with("codex")
    }

    pub(crate) fn wants_patch_instructions(&self) -> bool {
        self.model.starts_with("gpt-4.1")
    }
}

use apply_patch_engine::APPLY_PATCH_TOOL_INSTRUCTIONS;

use crate::config::AgentConfig;

pub const AGENT_PREFIX: &str = include_str!("../agent_prefix.md");

/// `User`, `Workdir`, `Platform` and `Shell` lines appended to the prefix.
pub fn environment_context() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let workdir = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());

    format!(
        "User: {user}\nWorkdir: {workdir}\nPlatform: {}\nShell: {shell}",
        std::env::consts::OS
    )
}

/// Built-in prefix, model-specific additions and user instructions, joined
/// by newlines with empty parts skipped.
pub fn merged_instructions(config: &AgentConfig, environment: &str) -> String {
    let prefix = format!("{}\n{environment}", AGENT_PREFIX.trim_end());
    let model_specific = if config.wants_patch_instructions() {
        APPLY_PATCH_TOOL_INSTRUCTIONS
    } else {
        ""
    };

    [prefix.as_str(), model_specific, config.instructions.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

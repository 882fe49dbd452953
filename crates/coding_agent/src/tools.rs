use agent_protocol::ToolSpec;
use serde_json::json;

use crate::config::AgentConfig;

pub const SHELL_TOOL: &str = "shell";
/// Alternative name some models use for the shell tool.
pub const CONTAINER_EXEC_TOOL: &str = "container.exec";
pub const APPLY_PATCH_TOOL: &str = "apply_patch";
pub const CONTINUE_TOOL: &str = "continue";
/// Final-answer tool: the model calls it when no further turns are needed.
pub const LAST_RESPONSE_TOOL: &str = "last_response";

pub fn shell_tool() -> ToolSpec {
    ToolSpec::Function {
        name: SHELL_TOOL.to_string(),
        description: "Runs a shell command, and returns its output.".to_string(),
        strict: false,
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {"type": "array", "items": {"type": "string"}},
                "workdir": {
                    "type": "string",
                    "description": "The working directory for the command."
                },
                "timeout": {
                    "type": "number",
                    "description": "The maximum time to wait for the command to complete in milliseconds."
                }
            },
            "required": ["command"],
            "additionalProperties": false
        }),
    }
}

pub fn continue_tool() -> ToolSpec {
    ToolSpec::no_argument_function(
        CONTINUE_TOOL,
        "Request another planning step before responding.",
    )
}

pub fn last_response_tool() -> ToolSpec {
    ToolSpec::no_argument_function(
        LAST_RESPONSE_TOOL,
        "Indicates the model has completed its task and no further turns are required.",
    )
}

/// Tools advertised on every request for the configured model.
pub fn tools_for(config: &AgentConfig) -> Vec<ToolSpec> {
    let shell = if config.uses_local_shell_tool() {
        ToolSpec::LocalShell
    } else {
        shell_tool()
    };
    vec![shell, continue_tool(), last_response_tool()]
}

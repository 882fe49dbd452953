use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::items::ResponseItem;

/// Tool advertised to the model on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSpec {
    Function {
        name: String,
        description: String,
        strict: bool,
        parameters: Value,
    },
    /// Built-in shell tool understood by `codex`-family models.
    LocalShell,
}

impl ToolSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } => name,
            Self::LocalShell => "local_shell",
        }
    }

    /// Function tool that takes no arguments.
    #[must_use]
    pub fn no_argument_function(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            description: description.into(),
            strict: false,
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Provider-neutral parameters for one streamed model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub instructions: Option<String>,
    pub input: Vec<ResponseItem>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: String,
    pub parallel_tool_calls: bool,
    pub reasoning: Option<Reasoning>,
    /// Whether the backend should persist this response for later reference.
    pub store: bool,
    pub previous_response_id: Option<String>,
    pub service_tier: Option<String>,
}

impl ModelRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, input: Vec<ResponseItem>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input,
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
            parallel_tool_calls: false,
            reasoning: None,
            store: true,
            previous_response_id: None,
            service_tier: None,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolSpec::name).collect()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    Refusal {
        refusal: String,
    },
    /// Content part kinds this crate does not model (images, files, ...).
    #[serde(other)]
    Unknown,
}

impl ContentItem {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::InputText { text } | Self::OutputText { text } => Some(text),
            Self::Refusal { refusal } => Some(refusal),
            Self::Unknown => None,
        }
    }
}

/// Nested function payload used by chat-style tool calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Action carried by a `local_shell_call` item.
///
/// `kind` is kept as a plain string so that unsupported action types still
/// deserialize and can be rejected by the dispatcher with a precise error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalShellAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LocalShellAction {
    pub const EXEC: &'static str = "exec";

    #[must_use]
    pub fn exec(
        command: Vec<String>,
        working_directory: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            kind: Self::EXEC.to_string(),
            command,
            working_directory,
            timeout_ms,
        }
    }

    pub fn is_exec(&self) -> bool {
        self.kind == Self::EXEC
    }
}

/// Conversation item exchanged with the model, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: Role,
        #[serde(default)]
        content: Vec<ContentItem>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
        /// Present only on chat-style calls, which nest name and arguments.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function: Option<ChatFunction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    LocalShellCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        action: LocalShellAction,
    },
    LocalShellCallOutput {
        call_id: String,
        output: String,
    },
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        summary: Vec<Value>,
        /// Local annotation of thinking time; never part of the wire schema.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Item kinds this crate does not model; they are delivered but never dispatched.
    #[serde(other)]
    Other,
}

impl ResponseItem {
    #[must_use]
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let content = match role {
            Role::Assistant => ContentItem::OutputText { text },
            _ => ContentItem::InputText { text },
        };
        Self::Message {
            id: None,
            role,
            content: vec![content],
        }
    }

    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::message(Role::User, text)
    }

    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Wire `type` tag of this item.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::LocalShellCall { .. } => "local_shell_call",
            Self::LocalShellCallOutput { .. } => "local_shell_call_output",
            Self::Reasoning { .. } => "reasoning",
            Self::Other => "other",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Message { id, .. }
            | Self::FunctionCall { id, .. }
            | Self::LocalShellCall { id, .. }
            | Self::Reasoning { id, .. } => id.as_deref(),
            Self::FunctionCallOutput { .. } | Self::LocalShellCallOutput { .. } | Self::Other => {
                None
            }
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Message { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Identifier the backend expects on the matching output item.
    ///
    /// Responses-style calls carry `call_id`; chat-style calls only carry `id`.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::FunctionCall { call_id, id, .. } | Self::LocalShellCall { call_id, id, .. } => {
                call_id.as_deref().or(id.as_deref())
            }
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::FunctionCall { .. } | Self::LocalShellCall { .. })
    }

    pub fn is_system_message(&self) -> bool {
        self.role() == Some(Role::System)
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning { .. })
    }

    /// Text of a message that consists of exactly one `output_text` part.
    pub fn single_output_text(&self) -> Option<&str> {
        match self {
            Self::Message {
                role: Role::Assistant,
                content,
                ..
            } => match content.as_slice() {
                [ContentItem::OutputText { text }] => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Copy of this item without transport-only fields (`id`, `status`,
    /// `duration_ms`), suitable for resending as request input.
    #[must_use]
    pub fn without_internal_fields(&self) -> Self {
        let mut clean = self.clone();
        match &mut clean {
            Self::Message { id, .. } => *id = None,
            Self::FunctionCall { id, status, .. } | Self::LocalShellCall { id, status, .. } => {
                *id = None;
                *status = None;
            }
            Self::Reasoning {
                id,
                duration_ms,
                extra,
                ..
            } => {
                *id = None;
                *duration_ms = None;
                extra.remove("status");
            }
            Self::FunctionCallOutput { .. } | Self::LocalShellCallOutput { .. } | Self::Other => {}
        }
        clean
    }

    /// Copy of this item with only `duration_ms` removed.
    #[must_use]
    pub fn without_duration(&self) -> Self {
        let mut clean = self.clone();
        if let Self::Reasoning { duration_ms, .. } = &mut clean {
            *duration_ms = None;
        }
        clean
    }
}

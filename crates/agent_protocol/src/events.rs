use serde::{Deserialize, Serialize};

use crate::items::ResponseItem;

/// Terminal status reported with a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    RequiresAction,
    Incomplete,
    Failed,
    Cancelled,
    Queued,
    InProgress,
}

impl ResponseStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "completed" => Self::Completed,
            "requires_action" => Self::RequiresAction,
            "incomplete" => Self::Incomplete,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RequiresAction => "requires_action",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
        }
    }

    /// Whether tool calls in the response output should be dispatched.
    pub fn expects_tool_dispatch(&self) -> bool {
        matches!(self, Self::Completed | Self::RequiresAction)
    }
}

/// Aggregate payload of a `response.completed` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedResponse {
    pub id: String,
    pub status: Option<ResponseStatus>,
    pub output: Vec<ResponseItem>,
}

/// Event vocabulary needed to drive one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// A fully formed output item.
    OutputItemDone { item: ResponseItem },
    OutputTextDelta { delta: String },
    Completed { response: CompletedResponse },
    /// Recognised frame the orchestrator does not act on.
    Other { event_type: String },
}

impl ResponseEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::OutputItemDone { .. } => "response.output_item.done",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::Completed { .. } => "response.completed",
            Self::Other { event_type } => event_type,
        }
    }
}

use std::sync::Arc;

use agent_protocol::ResponseItem;

/// Everything the orchestrator reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A conversation item ready to be shown.
    Item(ResponseItem),
    Loading(bool),
    /// Id of the last completed response; empty after a clean cancel.
    LastResponseId(String),
}

impl AgentEvent {
    pub fn item(&self) -> Option<&ResponseItem> {
        match self {
            Self::Item(item) => Some(item),
            Self::Loading(_) | Self::LastResponseId(_) => None,
        }
    }
}

pub type EventSink = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// Sink that drops every event.
pub fn discard_events() -> EventSink {
    Arc::new(|_| {})
}

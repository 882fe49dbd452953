//! Local conversation history kept when the backend does not store
//! responses, so every request can carry full context.

use std::collections::HashSet;

use agent_protocol::{ResponseItem, Role};

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    items: Vec<ResponseItem>,
    /// Ids of items already recorded through either append path.
    recorded_ids: HashSet<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ResponseItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.recorded_ids.clear();
    }

    /// Folds the caller's input in when a run starts.
    pub fn extend_input(&mut self, input: &[ResponseItem]) {
        for item in input.iter().filter(|item| is_api_message(item)) {
            self.record(item);
        }
    }

    /// Records an item as it is delivered to the consumer. Returns whether
    /// the item was appended.
    pub fn record_delivered(&mut self, item: &ResponseItem) -> bool {
        records_on_delivery(item) && self.record(item)
    }

    /// Records the aggregate output of a completed response.
    pub fn absorb_output(&mut self, output: &[ResponseItem]) {
        for item in output.iter().filter(|item| is_api_message(item)) {
            self.record(item);
        }
    }

    /// Input for the next request: the whole transcript followed by the
    /// delta, or nothing when the delta is empty.
    pub fn next_turn_input(&self, new_input: &[ResponseItem]) -> Vec<ResponseItem> {
        let delta: Vec<ResponseItem> = new_input
            .iter()
            .filter(|item| is_api_message(item))
            .map(ResponseItem::without_internal_fields)
            .collect();
        if delta.is_empty() {
            return Vec::new();
        }

        let mut input = self.items.clone();
        input.extend(delta);
        input
    }

    fn record(&mut self, item: &ResponseItem) -> bool {
        if let Some(id) = item.id() {
            if !self.recorded_ids.insert(id.to_string()) {
                return false;
            }
        }
        self.items.push(item.without_internal_fields());
        true
    }
}

/// Items the backend can accept back as input: no system notices, no
/// reasoning, nothing this crate cannot re-serialize.
pub fn is_api_message(item: &ResponseItem) -> bool {
    !item.is_system_message() && !item.is_reasoning() && !matches!(item, ResponseItem::Other)
}

pub fn filter_to_api_messages(items: &[ResponseItem]) -> Vec<ResponseItem> {
    items
        .iter()
        .filter(|item| is_api_message(item))
        .cloned()
        .collect()
}

/// Tool-call requests arrive with the completed output, and user messages
/// are folded in when the run starts, so neither is recorded on delivery.
fn records_on_delivery(item: &ResponseItem) -> bool {
    match item {
        ResponseItem::Message { role, .. } => !matches!(role, Role::System | Role::User),
        ResponseItem::FunctionCall { .. }
        | ResponseItem::LocalShellCall { .. }
        | ResponseItem::Reasoning { .. }
        | ResponseItem::Other => false,
        ResponseItem::FunctionCallOutput { .. } | ResponseItem::LocalShellCallOutput { .. } => {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_protocol::{ResponseItem, Role};
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    use super::Transcript;

    fn assistant(id: &str, text: &str) -> ResponseItem {
        ResponseItem::Message {
            id: Some(id.to_string()),
            role: Role::Assistant,
            content: vec![agent_protocol::ContentItem::OutputText {
                text: text.to_string(),
            }],
        }
    }

    fn reasoning() -> ResponseItem {
        ResponseItem::Reasoning {
            id: Some("rs_1".to_string()),
            summary: Vec::new(),
            duration_ms: Some(12),
            extra: Map::new(),
        }
    }

    #[test]
    fn delivery_skips_user_system_reasoning_and_calls() {
        let mut transcript = Transcript::new();
        assert!(!transcript.record_delivered(&ResponseItem::user_text("hi")));
        assert!(!transcript.record_delivered(&ResponseItem::message(Role::System, "note")));
        assert!(!transcript.record_delivered(&reasoning()));
        assert!(!transcript.record_delivered(&ResponseItem::FunctionCall {
            id: Some("fc_1".to_string()),
            call_id: Some("call_1".to_string()),
            name: Some("shell".to_string()),
            arguments: Some("{}".to_string()),
            function: None,
            status: None,
        }));
        assert!(transcript.record_delivered(&ResponseItem::function_call_output("call_1", "ok")));
        assert!(transcript.record_delivered(&assistant("msg_1", "done")));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn both_append_paths_share_deduplication() {
        let mut transcript = Transcript::new();
        let answer = assistant("msg_1", "done");

        transcript.record_delivered(&answer);
        transcript.absorb_output(&[answer.clone(), reasoning()]);

        assert_eq!(transcript.items(), &[answer.without_internal_fields()]);
    }

    #[test]
    fn empty_delta_yields_no_next_input() {
        let mut transcript = Transcript::new();
        transcript.extend_input(&[ResponseItem::user_text("hi")]);

        assert!(transcript
            .next_turn_input(&[ResponseItem::message(Role::System, "note")])
            .is_empty());

        let next = transcript.next_turn_input(&[ResponseItem::function_call_output("c", "out")]);
        assert_eq!(
            next,
            vec![
                ResponseItem::user_text("hi"),
                ResponseItem::function_call_output("c", "out"),
            ]
        );
    }
}

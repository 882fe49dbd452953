use agent_protocol::{ModelRequest, Reasoning, ResponseItem, ToolSpec};
use serde::Serialize;

/// JSON body of a streaming `POST /responses` request.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesPayload<'a> {
    pub model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<&'a str>,
    pub input: &'a [ResponseItem],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub tools: &'a [ToolSpec],
    pub tool_choice: &'a str,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<&'a Reasoning>,
    pub store: bool,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<&'static str>,
}

impl<'a> ResponsesPayload<'a> {
    /// Encode `request` for the wire. Unstored reasoning requests ask for
    /// encrypted reasoning content so it can be replayed statelessly.
    pub fn from_request(request: &'a ModelRequest) -> Self {
        let include = if !request.store && request.reasoning.is_some() {
            vec!["reasoning.encrypted_content"]
        } else {
            Vec::new()
        };

        Self {
            model: &request.model,
            instructions: request.instructions.as_deref(),
            input: &request.input,
            tools: &request.tools,
            tool_choice: &request.tool_choice,
            parallel_tool_calls: request.parallel_tool_calls,
            reasoning: request.reasoning.as_ref(),
            store: request.store,
            stream: true,
            previous_response_id: request
                .previous_response_id
                .as_deref()
                .filter(|id| !id.is_empty()),
            service_tier: request.service_tier.as_deref(),
            include,
        }
    }
}

fn is_empty_slice<T>(value: &&[T]) -> bool {
    value.is_empty()
}

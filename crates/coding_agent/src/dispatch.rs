//! Routing of model tool calls to the exec collaborator or a fallback
//! handler, and encoding of their results as conversation items.

use std::sync::Arc;

use agent_protocol::ResponseItem;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::AgentError;
use crate::exec::{ExecCollaborator, ExecContext, ExecOutcome, ExecRequest};
use crate::parsers::{parse_apply_patch_arguments, parse_tool_call_arguments};
use crate::tools::{
    APPLY_PATCH_TOOL, CONTAINER_EXEC_TOOL, CONTINUE_TOOL, LAST_RESPONSE_TOOL, SHELL_TOOL,
};

pub const NO_FUNCTION_FOUND: &str = "no function found";

/// A function call normalized from either the flat or the nested
/// (`function: {name, arguments}`) call shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
    pub call_id: String,
}

impl ToolCall {
    pub fn from_item(item: &ResponseItem) -> Option<Self> {
        let ResponseItem::FunctionCall {
            name,
            arguments,
            function,
            ..
        } = item
        else {
            return None;
        };

        let (name, arguments) = match function {
            Some(function) => (function.name.clone(), function.arguments.clone()),
            None => (name.clone(), arguments.clone()),
        };
        Some(Self {
            name: name.unwrap_or_default(),
            arguments: arguments.unwrap_or_default(),
            call_id: item.tool_call_id().unwrap_or_default().to_string(),
        })
    }
}

/// Items produced by one tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    pub items: Vec<ResponseItem>,
    /// Set when the model asked to end the loop after this turn.
    pub stop_requested: bool,
}

impl ToolResult {
    fn from_items(items: Vec<ResponseItem>) -> Self {
        Self {
            items,
            stop_requested: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericToolOutput {
    pub output_text: String,
    pub metadata: Option<Value>,
    pub additional_items: Vec<ResponseItem>,
}

/// Handles calls to tools the dispatcher does not know.
#[async_trait]
pub trait GenericToolHandler: Send + Sync {
    async fn handle(&self, name: &str, arguments: Value) -> GenericToolOutput;
}

/// Fallback that answers with the tool name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoToolHandler;

#[async_trait]
impl GenericToolHandler for EchoToolHandler {
    async fn handle(&self, name: &str, _arguments: Value) -> GenericToolOutput {
        GenericToolOutput {
            output_text: name.to_string(),
            ..GenericToolOutput::default()
        }
    }
}

#[derive(Clone)]
pub struct ToolDispatcher {
    exec: Arc<dyn ExecCollaborator>,
    generic: Arc<dyn GenericToolHandler>,
}

impl ToolDispatcher {
    pub fn new(exec: Arc<dyn ExecCollaborator>) -> Self {
        Self {
            exec,
            generic: Arc::new(EchoToolHandler),
        }
    }

    #[must_use]
    pub fn with_generic_handler(mut self, generic: Arc<dyn GenericToolHandler>) -> Self {
        self.generic = generic;
        self
    }

    /// Dispatches a `function_call` item. A cancelled context yields nothing.
    pub async fn handle_function_call(&self, item: &ResponseItem, ctx: &ExecContext) -> ToolResult {
        if ctx.cancel.is_cancelled() {
            return ToolResult::default();
        }
        let Some(call) = ToolCall::from_item(item) else {
            return ToolResult::default();
        };
        tracing::debug!(name = %call.name, call_id = %call.call_id, "dispatching function call");

        let output = match call.name.as_str() {
            CONTINUE_TOOL => "continue".to_string(),
            LAST_RESPONSE_TOOL => {
                return ToolResult {
                    items: Vec::new(),
                    stop_requested: true,
                };
            }
            SHELL_TOOL | CONTAINER_EXEC_TOOL => match parse_tool_call_arguments(&call.arguments) {
                Ok(request) => {
                    let outcome = self.exec.exec(request, ctx).await;
                    return exec_result(&call.call_id, outcome);
                }
                Err(error) => format!("error: {error}"),
            },
            APPLY_PATCH_TOOL => match parse_apply_patch_arguments(&call.arguments) {
                Some(args) => {
                    let request = ExecRequest::apply_patch(args.patch, args.workdir);
                    let outcome = self.exec.exec(request, ctx).await;
                    return exec_result(&call.call_id, outcome);
                }
                None => format!("invalid arguments: {}", call.arguments),
            },
            name if name.is_empty() => NO_FUNCTION_FOUND.to_string(),
            name => {
                let arguments = serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let output = self.generic.handle(name, arguments).await;
                let metadata = output
                    .metadata
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let mut items = vec![ResponseItem::function_call_output(
                    call.call_id,
                    json!({"output": output.output_text, "metadata": metadata}).to_string(),
                )];
                items.extend(output.additional_items);
                return ToolResult::from_items(items);
            }
        };

        ToolResult::from_items(vec![ResponseItem::function_call_output(call.call_id, output)])
    }

    /// Dispatches a `local_shell_call` item straight to the exec collaborator.
    pub async fn handle_local_shell_call(
        &self,
        item: &ResponseItem,
        ctx: &ExecContext,
    ) -> Result<ToolResult, AgentError> {
        if ctx.cancel.is_cancelled() {
            return Ok(ToolResult::default());
        }
        let ResponseItem::LocalShellCall {
            call_id, action, ..
        } = item
        else {
            return Ok(ToolResult::default());
        };
        if !action.is_exec() {
            return Err(AgentError::InvalidActionType(action.kind.clone()));
        }

        let call_id = call_id.clone().unwrap_or_default();
        tracing::debug!(%call_id, "dispatching local shell call");
        let request = ExecRequest {
            command: action.command.clone(),
            workdir: action.working_directory.clone(),
            timeout_ms: action.timeout_ms,
        };
        let outcome = self.exec.exec(request, ctx).await;

        let mut items = vec![ResponseItem::LocalShellCallOutput {
            call_id,
            output: exec_output_json(&outcome),
        }];
        items.extend(outcome.additional_items);
        Ok(ToolResult::from_items(items))
    }
}

fn exec_result(call_id: &str, outcome: ExecOutcome) -> ToolResult {
    let mut items = vec![ResponseItem::function_call_output(
        call_id,
        exec_output_json(&outcome),
    )];
    items.extend(outcome.additional_items);
    ToolResult::from_items(items)
}

/// `{"output": ..., "metadata": {...}}` as sent back to the model.
pub fn exec_output_json(outcome: &ExecOutcome) -> String {
    json!({"output": outcome.output_text, "metadata": outcome.metadata}).to_string()
}

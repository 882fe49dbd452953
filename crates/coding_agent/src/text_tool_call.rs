//! Recovery of tool calls that a model wrote as plain JSON text instead of
//! emitting a structured call.

use agent_protocol::{LocalShellAction, ResponseItem};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::exec::APPLY_PATCH_COMMAND;
use crate::parsers::{parse_apply_patch_arguments, parse_tool_call_arguments};

/// Turns text such as `{"cmd": ["ls"]}` into a synthetic `local_shell_call`.
///
/// The text may be surrounded by prose; the slice between the first `{` and
/// the last `}` is tried when the whole text is not JSON.
pub fn parse_text_tool_call(text: &str) -> Option<ResponseItem> {
    let object = json_object(text.trim())?;

    let action = if object.get("name").and_then(Value::as_str) == Some(APPLY_PATCH_COMMAND) {
        let parameters = object
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let args = parse_apply_patch_arguments(&parameters.to_string())?;
        LocalShellAction::exec(
            vec![APPLY_PATCH_COMMAND.to_string(), args.patch],
            args.workdir,
            None,
        )
    } else {
        let request = parse_tool_call_arguments(&Value::Object(object).to_string()).ok()?;
        LocalShellAction::exec(request.command, request.workdir, request.timeout_ms)
    };

    Some(ResponseItem::LocalShellCall {
        id: Some(Uuid::new_v4().to_string()),
        call_id: Some(Uuid::new_v4().to_string()),
        status: Some("completed".to_string()),
        action,
    })
}

fn json_object(text: &str) -> Option<Map<String, Value>> {
    let value = serde_json::from_str::<Value>(text).ok().or_else(|| {
        let first = text.find('{')?;
        let last = text.rfind('}')?;
        if first >= last {
            return None;
        }
        serde_json::from_str(&text[first..=last]).ok()
    })?;

    match value {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

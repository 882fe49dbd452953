//! Lenient parsers for model-authored tool arguments.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::exec::ExecRequest;

/// Patch text and optional working directory taken from `apply_patch`
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPatchArgs {
    pub patch: String,
    pub workdir: Option<String>,
}

/// Decoded `{output, metadata}` tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub output: String,
    pub metadata: Value,
}

/// Parses shell tool arguments into an exec request.
///
/// The command may be given as `cmd` or `command`, either as an array of
/// strings or as one string that is split with shell-word rules.
pub fn parse_tool_call_arguments(raw: &str) -> Result<ExecRequest, String> {
    let json: Value = serde_json::from_str(raw).map_err(|error| {
        tracing::debug!(arguments = raw, "failed to parse tool call arguments");
        error.to_string()
    })?;
    let Value::Object(object) = json else {
        return Err("arguments not an object".to_string());
    };

    let cmd = object.get("cmd");
    let command = object.get("command");
    let command = string_array(cmd)
        .or_else(|| string_array(command))
        .or_else(|| cmd.and_then(Value::as_str).map(maybe_split_string))
        .or_else(|| command.and_then(Value::as_str).map(maybe_split_string))
        .ok_or_else(|| "missing command".to_string())?;

    let workdir = object
        .get("workdir")
        .and_then(Value::as_str)
        .map(str::to_string);
    let timeout_ms = object.get("timeout").and_then(timeout_millis);

    Ok(ExecRequest {
        command,
        workdir,
        timeout_ms,
    })
}

/// Extracts patch text from the argument shapes models tend to produce.
pub fn parse_apply_patch_arguments(raw: &str) -> Option<ApplyPatchArgs> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };

    let patch = patch_from_object(&object)?;
    let workdir = object
        .get("workdir")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ApplyPatchArgs { patch, workdir })
}

fn patch_from_object(object: &Map<String, Value>) -> Option<String> {
    for key in ["patch", "body", "*body"] {
        if let Some(Value::String(patch)) = object.get(key) {
            return Some(patch.clone());
        }
    }

    match object.get("cmd")? {
        Value::Array(values) => {
            let parts: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
            match parts.as_slice() {
                [patch] => Some((*patch).to_string()),
                ["apply_patch", rest @ ..] if !rest.is_empty() => Some(rest.join("\n")),
                _ => None,
            }
        }
        Value::String(patch) => Some(patch.clone()),
        _ => None,
    }
}

/// Decodes a serialized tool output, falling back to treating the whole
/// string as failed output.
pub fn parse_tool_call_output(raw: &str) -> ToolCallOutput {
    serde_json::from_str(raw).unwrap_or_else(|_| ToolCallOutput {
        output: raw.to_string(),
        metadata: json!({"exit_code": 1, "duration_seconds": 0}),
    })
}

/// Whether `command` uses shell syntax outside of quotes.
pub fn contains_shell_operator(command: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in command.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some('"'), '"') => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '|' | '&' | ';' | '<' | '>' | '(' | ')') => return true,
            (None, _) => {}
        }
    }
    false
}

fn maybe_split_string(command: &str) -> Vec<String> {
    if contains_shell_operator(command) {
        return vec![command.to_string()];
    }
    shlex::split(command).unwrap_or_else(|| vec![command.to_string()])
}

fn string_array(value: Option<&Value>) -> Option<Vec<String>> {
    let values = value?.as_array()?;
    values
        .iter()
        .map(|value| value.as_str().map(str::to_string))
        .collect()
}

fn timeout_millis(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|millis| millis.is_finite() && *millis >= 0.0)
            .map(|millis| millis as u64)
    })
}

use agent_protocol::{CompletedResponse, ModelError, ResponseEvent, ResponseItem, ResponseStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ErrorBody;

pub type ParsedEvent = Result<ResponseEvent, ModelError>;

/// Incremental parser for Responses server-sent event streams.
///
/// Bytes are buffered until a frame is complete so that a multi-byte
/// character split across network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParsedEvent> {
        // A bare `\r` never occurs inside a UTF-8 sequence.
        self.buffer.extend(bytes.iter().filter(|byte| **byte != b'\r'));
        let mut events = Vec::new();

        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            events.extend(parse_frame(&String::from_utf8_lossy(&frame[..split])));
        }

        events
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        let frame = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&frame))
            .into_iter()
            .collect()
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ParsedEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        events.extend(parser.finish());
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(frame: &str) -> Option<ParsedEvent> {
    let payload = extract_data_payload(frame)?;
    if payload == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<Value>(&payload) {
        Ok(value) => map_event(value),
        Err(error) => {
            tracing::warn!(%error, "malformed JSON in response stream");
            Some(Err(ModelError::invalid_json(format!(
                "invalid JSON in response stream: {error}"
            ))))
        }
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<ResponseItem>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

fn map_event(mut value: Value) -> Option<ParsedEvent> {
    let event_type = value.get("type")?.as_str()?.to_string();

    let event = match event_type.as_str() {
        "response.output_text.delta" => Ok(ResponseEvent::OutputTextDelta {
            delta: value
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned(),
        }),
        "response.output_item.done" => {
            let item = value.get_mut("item").map(Value::take).unwrap_or(Value::Null);
            serde_json::from_value::<ResponseItem>(item)
                .map(|item| ResponseEvent::OutputItemDone { item })
                .map_err(|error| {
                    ModelError::invalid_json(format!("invalid output item in response stream: {error}"))
                })
        }
        "response.completed" | "response.incomplete" => {
            let response = value.get_mut("response").map(Value::take).unwrap_or(Value::Null);
            serde_json::from_value::<ResponseEnvelope>(response)
                .map(|envelope| ResponseEvent::Completed {
                    response: CompletedResponse {
                        id: envelope.id,
                        status: envelope.status.as_deref().and_then(ResponseStatus::parse),
                        output: envelope.output,
                    },
                })
                .map_err(|error| {
                    ModelError::invalid_json(format!("invalid response in response stream: {error}"))
                })
        }
        "response.failed" => {
            let response = value.get_mut("response").map(Value::take).unwrap_or(Value::Null);
            let body = serde_json::from_value::<ResponseEnvelope>(response)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_default();
            Err(stream_error(body, "response failed"))
        }
        "error" => {
            // Either `{type, code, message}` or `{type, error: {...}}`.
            let nested = value.get("error").is_some_and(Value::is_object);
            let mut fields = if nested {
                value.get_mut("error").map(Value::take).unwrap_or_default()
            } else {
                value
            };
            if let Some(object) = fields.as_object_mut() {
                if object.get("type").and_then(Value::as_str) == Some("error") {
                    object.remove("type");
                }
            }
            let body = serde_json::from_value::<ErrorBody>(fields).unwrap_or_default();
            Err(stream_error(body, "stream error"))
        }
        _ => Ok(ResponseEvent::Other { event_type }),
    };
    Some(event)
}

fn stream_error(body: ErrorBody, fallback: &str) -> ModelError {
    let message = body
        .message
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    body.decorate(ModelError::api(None, message))
}

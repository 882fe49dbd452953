use agent_protocol::ModelError;
use serde::Deserialize;
use thiserror::Error;

/// Failures building the transport itself. Request and stream failures are
/// reported as [`ModelError`] instead.
#[derive(Debug, Error)]
pub enum ResponsesApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid header {name}")]
    InvalidHeader { name: String },
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
    pub code: Option<StringOrNumber>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub param: Option<String>,
}

/// Error codes arrive as strings from the API and as numbers from some
/// compatible servers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::String(value) => value,
            Self::Number(value) => value.to_string(),
        }
    }
}

impl ErrorBody {
    /// Attach the body's code, type and param to `error`.
    pub(crate) fn decorate(self, mut error: ModelError) -> ModelError {
        if let Some(code) = self.code {
            error = error.with_code(code.into_string());
        }
        if let Some(error_type) = self.error_type {
            error = error.with_type(error_type);
        }
        if let Some(param) = self.param {
            error = error.with_param(param);
        }
        error
    }
}

/// Map a non-success HTTP response into a [`ModelError`].
pub fn model_error_from_response(status: u16, request_id: Option<&str>, body: &str) -> ModelError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).unwrap_or_default();
    let fields = envelope.error.unwrap_or_default();
    let message = fields
        .message
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback_message(status, body));

    let mut error = fields.decorate(ModelError::api(Some(status), message));
    if let Some(request_id) = request_id.filter(|id| !id.is_empty()) {
        error = error.with_request_id(request_id);
    }
    error
}

/// Map a reqwest failure (no response, or a broken body) into a [`ModelError`].
pub fn model_error_from_reqwest(error: &reqwest::Error) -> ModelError {
    if error.is_timeout() {
        return ModelError::timeout(error.to_string());
    }
    if let Some(status) = error.status() {
        return ModelError::api(Some(status.as_u16()), error.to_string());
    }
    ModelError::connection(error.to_string())
}

fn fallback_message(status: u16, body: &str) -> String {
    if !body.trim().is_empty() {
        return body.trim().to_string();
    }
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}

//! User-visible system notices that end a run without raising an error.

use std::time::{SystemTime, UNIX_EPOCH};

use agent_protocol::{ContentItem, ModelError, ResponseItem, Role};

const BILLING_URL: &str = "https://platform.openai.com/account/billing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ContextLengthExceeded,
    RateLimited {
        details: String,
    },
    Rejected {
        request_id: Option<String>,
        details: String,
    },
    InvalidJson,
    InsufficientQuota {
        message: String,
    },
    PrematureClose,
    NetworkError,
}

impl Notice {
    pub fn rate_limited(error: &ModelError) -> Self {
        Self::RateLimited {
            details: error.details(),
        }
    }

    pub fn rejected(error: &ModelError) -> Self {
        Self::Rejected {
            request_id: error.request_id.clone(),
            details: error.details(),
        }
    }

    pub fn insufficient_quota(error: &ModelError) -> Self {
        Self::InsufficientQuota {
            message: error.message.trim().to_string(),
        }
    }

    pub fn text(&self) -> String {
        match self {
            Self::ContextLengthExceeded => "⚠️  The current request exceeds the maximum context length supported by the chosen model. Please shorten the conversation, run /clear, or switch to a model with a larger context window and try again.".to_string(),
            Self::RateLimited { details } => {
                format!("⚠️  Rate limit reached. Error details: {details}. Please try again later.")
            }
            Self::Rejected {
                request_id,
                details,
            } => {
                let request = request_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .map(|id| format!(" (request ID: {id})"))
                    .unwrap_or_default();
                format!(
                    "⚠️  OpenAI rejected the request{request}. Error details: {details}. Please verify your settings and try again."
                )
            }
            Self::InvalidJson => {
                "⚠️ Failed to parse streaming response (invalid JSON). Please `/clear` to reset."
                    .to_string()
            }
            Self::InsufficientQuota { message } => {
                let message = if message.is_empty() {
                    "No remaining quota."
                } else {
                    message.as_str()
                };
                format!("\u{26a0} Insufficient quota: {message} Manage or purchase credits at {BILLING_URL}.")
            }
            Self::PrematureClose => {
                "⚠️  Connection closed prematurely while waiting for the model. Please try again."
                    .to_string()
            }
            Self::NetworkError => {
                "⚠️  Network error while contacting OpenAI. Please check your connection and try again."
                    .to_string()
            }
        }
    }

    /// System message carrying this notice, stamped with an `error-<ms>` id.
    pub fn into_item(self) -> ResponseItem {
        ResponseItem::Message {
            id: Some(format!("error-{}", unix_millis())),
            role: Role::System,
            content: vec![ContentItem::InputText { text: self.text() }],
        }
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

//! Streaming transport for OpenAI-compatible Responses endpoints.
//!
//! [`ResponsesClient`] implements [`agent_protocol::ModelClient`]: it encodes
//! a [`agent_protocol::ModelRequest`] as a streaming `POST /responses` body,
//! frames the server-sent events and maps both error bodies and stream
//! failures into [`agent_protocol::ModelError`] so the orchestrator can
//! classify them.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;

pub use client::ResponsesClient;
pub use config::ResponsesApiConfig;
pub use error::ResponsesApiError;
pub use payload::ResponsesPayload;
pub use sse::SseStreamParser;
pub use url::normalize_responses_url;

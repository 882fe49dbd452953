//! Execution core of a terminal coding agent.
//!
//! This facade re-exports the workspace crates and adds process-level setup:
//! environment configuration ([`config::EnvConfig`]) and diagnostic tracing
//! ([`logging::init_tracing`]).
//!
//! # Crates
//! - [`agent_protocol`]: conversation items, requests, events and the
//!   [`ModelClient`] seam.
//! - [`responses_api`]: streaming transport for Responses endpoints.
//! - [`coding_agent`]: the turn orchestrator, tool dispatch and local exec.
//! - [`apply_patch_engine`]: full-context and search/replace patch formats.

use std::sync::Arc;

pub mod config;
pub mod logging;

pub use agent_protocol;
pub use apply_patch_engine;
pub use coding_agent;
pub use responses_api;

pub use agent_protocol::{ModelClient, ResponseItem};
pub use coding_agent::{AgentConfig, AgentError, AgentEvent, AgentLoop, EventSink, LocalExec};
pub use config::EnvConfig;
pub use responses_api::{ResponsesApiConfig, ResponsesApiError, ResponsesClient};

/// Agent wired to a [`ResponsesClient`] and [`LocalExec`], both configured
/// from the environment.
pub fn agent_from_env(sink: EventSink) -> Result<AgentLoop, ResponsesApiError> {
    let env = EnvConfig::from_env();
    let agent_config = env.agent_config();
    let client = ResponsesClient::new(env.responses_api)?;
    tracing::debug!(model = %agent_config.model, "building agent from environment");
    Ok(AgentLoop::new(
        agent_config,
        Arc::new(client),
        Arc::new(LocalExec::new()),
        sink,
    ))
}

//! Execution core of a terminal coding agent.
//!
//! [`AgentLoop`] drives a conversation with a [`agent_protocol::ModelClient`]:
//! it sends the turn input, stages streamed items for delayed delivery to an
//! [`EventSink`], dispatches the tool calls of each completed response through
//! an [`ExecCollaborator`], and feeds the tool outputs back as the next turn.
//!
//! ## Conversation storage
//!
//! By default the backend stores responses and each request references the
//! previous one by id. With
//! [`AgentConfig::disable_response_storage`](config::AgentConfig) set, the
//! loop keeps a local [`Transcript`] instead and every request carries the
//! whole conversation.
//!
//! ## Failures
//!
//! Recoverable provider failures (rate limits after retries, rejected
//! requests, context overflow, dropped connections) end the run with a system
//! message delivered as an ordinary item. Only unrecognised provider errors
//! and use after [`AgentLoop::terminate`] surface as [`AgentError`].
//!
//! Set `OPENAI_RATE_LIMIT_RETRY_WAIT_MS` and call
//! [`AgentConfig::with_env_overrides`](config::AgentConfig::with_env_overrides)
//! to change the base rate-limit backoff.

use std::sync::{Mutex, MutexGuard};

pub mod agent_loop;
pub mod approval;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod exec;
pub mod instructions;
pub mod local_exec;
pub mod notices;
pub mod parsers;
pub mod retry;
mod staging;
pub mod text_tool_call;
pub mod tools;
pub mod transcript;
pub mod workflow;

pub use agent_loop::AgentLoop;
pub use approval::{
    ApprovalPolicy, CommandConfirmation, ConfirmationHandler, PatchDetails, ReviewDecision,
    StaticConfirmation,
};
pub use config::AgentConfig;
pub use dispatch::{GenericToolHandler, GenericToolOutput, ToolDispatcher, ToolResult};
pub use error::AgentError;
pub use events::{discard_events, AgentEvent, EventSink};
pub use exec::{ExecCollaborator, ExecContext, ExecMetadata, ExecOutcome, ExecRequest};
pub use local_exec::LocalExec;
pub use notices::Notice;
pub use staging::DELIVERY_DELAY;
pub use transcript::Transcript;
pub use workflow::{default_workflow, run_workflow, Workflow, WorkflowPhase};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

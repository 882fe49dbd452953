//! Provider-neutral contract between the turn orchestrator and a model backend.
//!
//! This crate defines the conversation item model exchanged in both
//! directions, the abstract request and event vocabulary required to drive a
//! turn, the provider error shape used for retry classification, and the
//! [`ModelClient`] trait. It contains no transport code.

pub mod client;
pub mod error;
pub mod events;
pub mod items;
pub mod request;

pub use client::{ModelClient, ResponseStream};
pub use error::{ModelError, ModelErrorKind};
pub use events::{CompletedResponse, ResponseEvent, ResponseStatus};
pub use items::{ChatFunction, ContentItem, LocalShellAction, ResponseItem, Role};
pub use request::{ModelRequest, Reasoning, ToolSpec};

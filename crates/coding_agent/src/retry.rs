//! Classification of provider failures into retry, notice or fatal outcomes.

use std::sync::OnceLock;
use std::time::Duration;

use agent_protocol::{ModelError, ModelErrorKind};
use regex::Regex;

use crate::notices::Notice;

/// Attempts made to open a stream before giving up.
pub const MAX_RETRIES: u32 = 8;
/// Extra attempts allowed when a stream is rate limited after it opened.
pub const MAX_STREAM_RETRIES: u32 = 5;
pub const DEFAULT_RATE_LIMIT_RETRY_WAIT: Duration = Duration::from_millis(500);

const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
const INVALID_REQUEST_ERROR: &str = "invalid_request_error";
const SERVER_ERROR: &str = "server_error";
const MODEL_NOT_FOUND: &str = "model_not_found";
pub(crate) const INSUFFICIENT_QUOTA: &str = "insufficient_quota";

/// What to do after a failed attempt to open a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestErrorAction {
    RetryNow,
    RetryAfter(Duration),
    Notice(Notice),
    Fatal,
}

/// Decide how to react to `error` on attempt number `attempt` (1-based).
pub fn classify_request_error(
    error: &ModelError,
    attempt: u32,
    base_wait: Duration,
) -> RequestErrorAction {
    if is_transient(error) && attempt < MAX_RETRIES {
        return RequestErrorAction::RetryNow;
    }

    if is_context_length_error(error) {
        return RequestErrorAction::Notice(Notice::ContextLengthExceeded);
    }

    if is_request_rate_limit(error) {
        if attempt < MAX_RETRIES {
            return RequestErrorAction::RetryAfter(rate_limit_delay(
                base_wait,
                attempt,
                &error.message,
            ));
        }
        return RequestErrorAction::Notice(Notice::rate_limited(error));
    }

    if is_client_error(error) {
        return RequestErrorAction::Notice(Notice::rejected(error));
    }

    RequestErrorAction::Fatal
}

/// Notice for an error that escaped both the request and stream handlers,
/// or `None` when the error must surface to the caller.
pub fn classify_unhandled_error(error: &ModelError) -> Option<Notice> {
    if error.kind == ModelErrorKind::PrematureClose || error.message.contains("Premature close") {
        return Some(Notice::PrematureClose);
    }
    if is_network_or_server_error(error) {
        return Some(Notice::NetworkError);
    }
    if is_model_not_found(error) {
        return Some(Notice::rejected(error));
    }
    None
}

/// Timeouts, connection failures and server-side errors.
pub fn is_transient(error: &ModelError) -> bool {
    matches!(
        error.kind,
        ModelErrorKind::Timeout | ModelErrorKind::Connection
    ) || error.status.is_some_and(|status| status >= 500)
        || error.error_type() == Some(SERVER_ERROR)
}

pub fn is_context_length_error(error: &ModelError) -> bool {
    let names_max_tokens = error.param.as_deref() == Some("max_tokens")
        || max_tokens_regex().is_match(&error.message);
    names_max_tokens && error.error_type() == Some(INVALID_REQUEST_ERROR)
}

/// Rate limit as signalled by status, code or type.
pub fn is_rate_limit_error(error: &ModelError) -> bool {
    error.status == Some(429)
        || error.code() == Some(RATE_LIMIT_EXCEEDED)
        || error.error_type() == Some(RATE_LIMIT_EXCEEDED)
}

/// Request-path rate limit check, which also trusts the message text.
pub fn is_request_rate_limit(error: &ModelError) -> bool {
    is_rate_limit_error(error) || rate_limit_regex().is_match(&error.message)
}

pub fn is_client_error(error: &ModelError) -> bool {
    error
        .status
        .is_some_and(|status| (400..500).contains(&status) && status != 429)
        || error.code() == Some(INVALID_REQUEST_ERROR)
        || error.error_type() == Some(INVALID_REQUEST_ERROR)
}

pub fn is_network_or_server_error(error: &ModelError) -> bool {
    matches!(
        error.kind,
        ModelErrorKind::Connection | ModelErrorKind::Timeout
    ) || error.status.is_some_and(|status| status >= 500)
        || network_regex().is_match(&error.message)
}

pub fn is_model_not_found(error: &ModelError) -> bool {
    error.error_type() == Some(INVALID_REQUEST_ERROR) && error.code() == Some(MODEL_NOT_FOUND)
}

pub fn is_insufficient_quota(error: &ModelError) -> bool {
    error.code() == Some(INSUFFICIENT_QUOTA)
}

/// `base * 2^(attempt-1)`, unless the message suggests its own wait.
pub fn rate_limit_delay(base_wait: Duration, attempt: u32, message: &str) -> Duration {
    suggested_retry_delay(message).unwrap_or_else(|| exponential_delay(base_wait, attempt))
}

pub fn exponential_delay(base_wait: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base_wait.saturating_mul(1u32 << exponent)
}

/// Parses waits such as "Please try again in 1.3s".
pub fn suggested_retry_delay(message: &str) -> Option<Duration> {
    let captures = retry_after_regex().captures(message)?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0).round() as u64))
}

fn retry_after_regex() -> &'static Regex {
    static RETRY_AFTER: OnceLock<Regex> = OnceLock::new();
    RETRY_AFTER.get_or_init(|| {
        Regex::new(r"(?i)(?:retry|try) again in ([\d.]+)s").expect("retry-after regex compiles")
    })
}

fn rate_limit_regex() -> &'static Regex {
    static RATE_LIMIT: OnceLock<Regex> = OnceLock::new();
    RATE_LIMIT.get_or_init(|| Regex::new(r"(?i)rate limit").expect("rate limit regex compiles"))
}

fn max_tokens_regex() -> &'static Regex {
    static MAX_TOKENS: OnceLock<Regex> = OnceLock::new();
    MAX_TOKENS.get_or_init(|| {
        Regex::new(r"(?i)max_tokens is too large").expect("max_tokens regex compiles")
    })
}

fn network_regex() -> &'static Regex {
    static NETWORK: OnceLock<Regex> = OnceLock::new();
    NETWORK.get_or_init(|| Regex::new(r"(?i)network|socket|stream").expect("network regex compiles"))
}

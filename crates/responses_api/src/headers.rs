use std::collections::BTreeMap;

use crate::config::ResponsesApiConfig;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_ORGANIZATION: &str = "openai-organization";
pub const HEADER_PROJECT: &str = "openai-project";
pub const HEADER_ORIGINATOR: &str = "originator";
pub const HEADER_SESSION_ID: &str = "session_id";
pub const HEADER_USER_AGENT: &str = "user-agent";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Build a deterministic header map for a Responses request.
///
/// Extra headers from the configuration are lower-cased and win over the
/// defaults; the session id is applied last.
pub fn build_headers(config: &ResponsesApiConfig) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    let api_key = config.api_key.trim();
    if !api_key.is_empty() {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {api_key}"));
    }
    if let Some(organization) = non_empty(config.organization.as_deref()) {
        headers.insert(HEADER_ORGANIZATION.to_owned(), organization.to_owned());
    }
    if let Some(project) = non_empty(config.project.as_deref()) {
        headers.insert(HEADER_PROJECT.to_owned(), project.to_owned());
    }
    headers.insert(
        HEADER_ORIGINATOR.to_owned(),
        config.originator.trim().to_owned(),
    );
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );
    let user_agent = non_empty(config.user_agent.as_deref())
        .map(str::to_owned)
        .unwrap_or_else(default_user_agent);
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    if let Some(session_id) = non_empty(config.session_id.as_deref()) {
        headers.insert(HEADER_SESSION_ID.to_owned(), session_id.to_owned());
    }

    headers
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn default_user_agent() -> String {
    format!(
        "codex_core/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

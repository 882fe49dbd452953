/// Default base URL for Responses requests.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Normalize a base URL to a Responses endpoint.
///
/// An empty input falls back to [`DEFAULT_BASE_URL`]; a URL that already
/// ends in `/responses` is kept, anything else gets `/responses` appended.
pub fn normalize_responses_url(input: &str) -> String {
    let base = match input.trim() {
        "" => DEFAULT_BASE_URL,
        trimmed => trimmed,
    };

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/responses") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/responses")
    }
}

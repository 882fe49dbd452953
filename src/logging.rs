//! Diagnostic tracing setup.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FILTER: &str = "CODEX_AGENT_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Installs a stderr `fmt` subscriber filtered by `CODEX_AGENT_LOG`
/// (default `warn`). Returns `false` when a global subscriber was already
/// installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(ENV_LOG_FILTER)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

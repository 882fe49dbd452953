//! Environment configuration.

use std::env;

use coding_agent::AgentConfig;
use responses_api::ResponsesApiConfig;

pub const ENV_MODEL: &str = "CODEX_MODEL";
pub const ENV_DISABLE_RESPONSE_STORAGE: &str = "CODEX_DISABLE_RESPONSE_STORAGE";

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub model: Option<String>,
    pub disable_response_storage: bool,
    pub responses_api: ResponsesApiConfig,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            model: env_string_opt(ENV_MODEL),
            disable_response_storage: env_flag(ENV_DISABLE_RESPONSE_STORAGE),
            responses_api: ResponsesApiConfig::from_env(),
        }
    }

    /// Agent settings derived from the environment, including
    /// `OPENAI_RATE_LIMIT_RETRY_WAIT_MS`.
    pub fn agent_config(&self) -> AgentConfig {
        let config = match &self.model {
            Some(model) => AgentConfig::new(model.clone()),
            None => AgentConfig::default(),
        };
        config
            .with_disable_response_storage(self.disable_response_storage)
            .with_env_overrides()
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

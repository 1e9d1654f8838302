//! LLM configuration for the reporter's optional text-completion call

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Text-completion endpoint settings. The API key itself is never stored in
/// configuration; only the name of the environment variable holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Allow the reporter to call the LLM at all
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the generative language API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_timeout")]
    pub timeout: Duration,

    /// Upper bound on generated tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// YAML file of handlebars prompt templates; the built-in prompts apply
    /// when unset or when the file lacks a template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint: default_endpoint(),
            timeout: default_timeout(),
            max_output_tokens: default_max_output_tokens(),
            prompt_file: None,
        }
    }
}

impl LlmConfig {
    /// The API key, if the LLM is enabled and the key variable is set and non-empty
    pub fn api_key(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl Validatable for LlmConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.api_key_env, "api_key_env", self.domain_name())?;
        validate_required_string(&self.model, "model", self.domain_name())?;
        validate_url(&self.endpoint, "endpoint", self.domain_name())?;
        validate_positive(self.timeout.as_millis(), "timeout", self.domain_name())?;
        validate_positive(self.max_output_tokens, "max_output_tokens", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "llm"
    }
}

fn default_api_key_env() -> String {
    "GENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gemini-1.5-pro".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_output_tokens() -> u32 {
    1024
}

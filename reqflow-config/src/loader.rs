//! Configuration loading and environment variable handling

use crate::domains::utils::parse_duration;
use crate::domains::ReqflowConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "REQFLOW".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ReqflowConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<ReqflowConfig> {
        let mut config: ReqflowConfig = if content.trim().is_empty() {
            ReqflowConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ReqflowConfig> {
        let mut config = ReqflowConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ReqflowConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ReqflowConfig) -> ConfigResult<()> {
        self.apply_pipeline_overrides(&mut config.pipeline)?;
        self.apply_logging_overrides(&mut config.logging)?;
        self.apply_llm_overrides(&mut config.llm)?;
        Ok(())
    }

    /// Apply pipeline timing overrides
    fn apply_pipeline_overrides(
        &self,
        config: &mut crate::domains::pipeline::PipelineConfig,
    ) -> ConfigResult<()> {
        if let Some(timeout) = self.get_duration("STARTUP_TIMEOUT")? {
            config.startup_timeout = timeout;
        }

        if let Some(timeout) = self.get_duration("CALL_TIMEOUT")? {
            config.call_timeout = timeout;
        }

        if let Some(grace) = self.get_duration("SHUTDOWN_GRACE")? {
            config.shutdown_grace = grace;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::env(self.var_name("LOG_LEVEL"), &log_level))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::env(self.var_name("LOG_FORMAT"), &format))?;
        }

        Ok(())
    }

    /// Apply LLM overrides. The bare `LLM_MODEL` variable is honoured for
    /// compatibility with existing worker deployments; the prefixed one wins.
    fn apply_llm_overrides(&self, config: &mut crate::domains::llm::LlmConfig) -> ConfigResult<()> {
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.model = model;
        }

        if let Ok(model) = self.get_env_var("LLM_MODEL") {
            config.model = model;
        }

        if let Ok(endpoint) = self.get_env_var("LLM_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Ok(path) = self.get_env_var("LLM_PROMPT_FILE") {
            config.prompt_file = (!path.trim().is_empty()).then(|| path.into());
        }

        if let Ok(enabled) = self.get_env_var("LLM_ENABLED") {
            config.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::env(self.var_name("LLM_ENABLED"), e))?;
        }

        Ok(())
    }

    /// Read a duration (`"500ms"`, `"5s"`, bare seconds) from a prefixed variable
    fn get_duration(&self, name: &str) -> ConfigResult<Option<Duration>> {
        match self.get_env_var(name) {
            Ok(value) => parse_duration(&value)
                .map(Some)
                .map_err(|reason| ConfigError::env(self.var_name(name), reason)),
            Err(_) => Ok(None),
        }
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(self.var_name(name))
    }
}

//! Domain-specific configuration modules

pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod utils;
pub mod workers;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main reqflow configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReqflowConfig {
    /// How each worker process is launched
    #[serde(default)]
    pub workers: workers::WorkersConfig,

    /// Handshake, call and shutdown timing
    #[serde(default)]
    pub pipeline: pipeline::PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// LLM access used by the reporter worker
    #[serde(default)]
    pub llm: llm::LlmConfig,
}

impl ReqflowConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.workers.validate()?;
        self.pipeline.validate()?;
        self.logging.validate()?;
        self.llm.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ReqflowConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

//! Pipeline timing configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts governing one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long to wait for each worker's capability announcement
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_startup_timeout")]
    pub startup_timeout: Duration,

    /// How long to wait for the response to a single stage request
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_call_timeout")]
    pub call_timeout: Duration,

    /// Grace period between closing a worker's stdin and killing it
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            call_timeout: default_call_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Validatable for PipelineConfig {
    fn validate(&self) -> ConfigResult<()> {
        // Sub-second values are only reachable programmatically, so compare millis
        validate_positive(
            self.startup_timeout.as_millis(),
            "startup_timeout",
            self.domain_name(),
        )?;
        validate_positive(self.call_timeout.as_millis(), "call_timeout", self.domain_name())?;
        validate_positive(
            self.shutdown_grace.as_millis(),
            "shutdown_grace",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pipeline"
    }
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

//! Configuration error types

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `REQFLOW_*` override that does not parse
    #[error("Invalid {variable}: {reason}")]
    EnvError { variable: String, reason: String },

    /// A domain that parsed but fails validation
    #[error("Invalid {domain} configuration: {message}")]
    DomainError { domain: String, message: String },
}

impl ConfigError {
    pub(crate) fn env(variable: impl Into<String>, reason: impl ToString) -> Self {
        Self::EnvError {
            variable: variable.into(),
            reason: reason.to_string(),
        }
    }
}

//! Domain-driven configuration management for reqflow
//!
//! Configuration is split by functional domain (worker commands, pipeline
//! timing, logging, LLM access), each with its own defaults and validation,
//! and can be loaded from YAML with `REQFLOW_*` environment overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    llm::LlmConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    pipeline::PipelineConfig,
    workers::{WorkerCommand, WorkerKind, WorkersConfig},
    ReqflowConfig,
};

// Re-export utilities
pub use domains::utils::{parse_duration, serde_duration};

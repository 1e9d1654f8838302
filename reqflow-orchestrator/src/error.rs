//! Error types for pipeline runs

use std::time::Duration;
use thiserror::Error;

use reqflow_config::WorkerKind;
use reqflow_ipc::{IpcError, WorkerExit};

/// Why a pipeline run stopped. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to launch {worker} worker: {source}")]
    Launch {
        worker: WorkerKind,
        #[source]
        source: IpcError,
    },

    #[error("{worker} worker did not start: {reason}")]
    Startup {
        worker: WorkerKind,
        reason: String,
        #[source]
        source: Option<IpcError>,
    },

    #[error("Stage {stage} lost the {worker} worker: {source}")]
    Transport {
        stage: String,
        worker: WorkerKind,
        #[source]
        source: IpcError,
    },

    #[error("Stage {stage} timed out after {timeout:?} waiting for the {worker} worker")]
    Timeout {
        stage: String,
        worker: WorkerKind,
        timeout: Duration,
    },

    #[error("Stage {stage} failed in the {worker} worker: {error}")]
    StageFailed {
        stage: String,
        worker: WorkerKind,
        error: String,
        trace: Option<String>,
    },

    #[error("Stage {stage} ({worker}) needs {field}, which no earlier stage produced")]
    MissingField {
        stage: String,
        worker: WorkerKind,
        field: String,
    },

    #[error("Stage {stage} got an invalid response from the {worker} worker: {reason}")]
    InvalidResponse {
        stage: String,
        worker: WorkerKind,
        reason: String,
    },
}

impl PipelineError {
    /// Whether a process or pipe failed, as opposed to a worker answering badly
    pub fn is_transport(&self) -> bool {
        match self {
            PipelineError::Launch { .. } | PipelineError::Transport { .. } => true,
            PipelineError::Startup { source, .. } => {
                source.as_ref().is_some_and(IpcError::is_transport)
            }
            _ => false,
        }
    }

    /// The stage that failed, if the run got that far
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Transport { stage, .. }
            | PipelineError::Timeout { stage, .. }
            | PipelineError::StageFailed { stage, .. }
            | PipelineError::MissingField { stage, .. }
            | PipelineError::InvalidResponse { stage, .. } => Some(stage),
            PipelineError::Launch { .. } | PipelineError::Startup { .. } => None,
        }
    }

    pub fn worker(&self) -> WorkerKind {
        match self {
            PipelineError::Launch { worker, .. }
            | PipelineError::Startup { worker, .. }
            | PipelineError::Transport { worker, .. }
            | PipelineError::Timeout { worker, .. }
            | PipelineError::StageFailed { worker, .. }
            | PipelineError::MissingField { worker, .. }
            | PipelineError::InvalidResponse { worker, .. } => *worker,
        }
    }
}

/// A failed run, reported only after every launched worker was terminated
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    pub shutdown: Vec<WorkerExit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let launch = PipelineError::Launch {
            worker: WorkerKind::Collector,
            source: IpcError::ConnectionClosed,
        };
        assert!(launch.is_transport());
        assert_eq!(launch.stage(), None);

        let closed_at_startup = PipelineError::Startup {
            worker: WorkerKind::Vector,
            reason: "no announcement".to_string(),
            source: Some(IpcError::ConnectionClosed),
        };
        assert!(closed_at_startup.is_transport());

        let silent = PipelineError::Startup {
            worker: WorkerKind::Vector,
            reason: "no announcement".to_string(),
            source: None,
        };
        assert!(!silent.is_transport());

        let failed = PipelineError::StageFailed {
            stage: "prioritize".to_string(),
            worker: WorkerKind::Requirement,
            error: "boom".to_string(),
            trace: None,
        };
        assert!(!failed.is_transport());
        assert_eq!(failed.stage(), Some("prioritize"));
        assert_eq!(failed.worker(), WorkerKind::Requirement);
        assert_eq!(
            failed.to_string(),
            "Stage prioritize failed in the requirement worker: boom"
        );
    }
}

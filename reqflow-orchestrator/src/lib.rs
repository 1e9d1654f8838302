//! Reqflow pipeline orchestration
//!
//! Launches one process per worker kind a pipeline needs, waits for each
//! capability announcement, then drives the stages in order over
//! [`reqflow_ipc::ProcessChannel`]s. The first failure ends the run; every
//! launched worker is terminated before the outcome is returned.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod stage;
pub mod workers;

pub use context::{FieldMissing, PipelineContext, PipelineInput, StageRecord, INPUT_KEY};
pub use error::{PipelineError, RunFailure};
pub use orchestrator::{Orchestrator, PipelineRun};
pub use stage::{OutputSelector, ParamsBuilder, Pipeline, Stage};
pub use workers::{WorkerHandle, WorkerSet};

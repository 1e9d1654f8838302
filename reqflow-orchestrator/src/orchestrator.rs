//! Runs a pipeline against freshly launched workers

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use reqflow_config::{ReqflowConfig, WorkerCommand, WorkerKind};
use reqflow_ipc::{IpcError, Request, ResponseBody, WorkerExit};

use crate::context::{PipelineContext, PipelineInput, StageRecord};
use crate::error::{PipelineError, RunFailure};
use crate::stage::{Pipeline, Stage};
use crate::workers::WorkerSet;

/// A successful run
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// The value named by the pipeline's output selector
    pub output: JsonValue,
    pub context: PipelineContext,
    pub shutdown: Vec<WorkerExit>,
}

pub struct Orchestrator {
    config: ReqflowConfig,
}

impl Orchestrator {
    pub fn new(config: ReqflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReqflowConfig {
        &self.config
    }

    /// Launch the pipeline's workers, run every stage in order, and stop the
    /// workers again.
    ///
    /// Workers are terminated on every path before this returns, so a
    /// failure never leaves a process behind.
    pub async fn run(&self, pipeline: &Pipeline, input: PipelineInput) -> Result<PipelineRun, RunFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id, pipeline = pipeline.name);

        async move {
            info!(stages = pipeline.stages.len(), "Starting pipeline run");

            let mut workers = WorkerSet::new();
            let mut context = PipelineContext::new(run_id, &input);
            let outcome = self.execute(pipeline, &mut workers, &mut context).await;
            let shutdown = workers.terminate_all().await;

            match outcome {
                Ok(output) => {
                    info!(workers = shutdown.len(), "Pipeline run completed");
                    Ok(PipelineRun {
                        run_id,
                        output,
                        context,
                        shutdown,
                    })
                }
                Err(error) => {
                    error!(error = %error, "Pipeline run failed");
                    Err(RunFailure { error, shutdown })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        pipeline: &Pipeline,
        workers: &mut WorkerSet,
        context: &mut PipelineContext,
    ) -> Result<JsonValue, PipelineError> {
        let grace = self.config.pipeline.shutdown_grace;
        for kind in pipeline.required_workers() {
            let command = self.command_for(kind)?;
            workers.launch(kind, &command, grace)?;
        }
        workers.handshake(self.config.pipeline.startup_timeout).await?;

        for (index, stage) in pipeline.stages.iter().enumerate() {
            let result = self
                .run_stage(stage, index as u64 + 1, workers, context)
                .await?;
            context.record(result);
        }

        select_output(pipeline, context)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        request_id: u64,
        workers: &mut WorkerSet,
        context: &PipelineContext,
    ) -> Result<StageRecord, PipelineError> {
        let params = (stage.params)(context).map_err(|missing| PipelineError::MissingField {
            stage: stage.name.to_string(),
            worker: stage.worker,
            field: missing.0,
        })?;

        if workers.announced(stage.worker, stage.method) == Some(false) {
            warn!(
                stage = stage.name,
                worker = %stage.worker,
                method = stage.method,
                "Worker did not announce this method"
            );
        }

        let timeout = self.config.pipeline.call_timeout;
        let request = Request::new(request_id, stage.method, params);
        let started_at = Utc::now();
        debug!(stage = stage.name, worker = %stage.worker, id = request_id, "Stage started");

        let response = workers
            .call(stage.worker, &request, timeout)
            .await
            .map_err(|e| call_error(stage, e))?
            .ok_or_else(|| PipelineError::Timeout {
                stage: stage.name.to_string(),
                worker: stage.worker,
                timeout,
            })?;

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        match response.response {
            ResponseBody::Success(fields) => {
                info!(stage = stage.name, worker = %stage.worker, duration_ms, "Stage completed");
                Ok(StageRecord {
                    stage: stage.name.to_string(),
                    worker: stage.worker,
                    method: stage.method.to_string(),
                    started_at,
                    finished_at,
                    duration_ms,
                    result: JsonValue::Object(fields),
                })
            }
            ResponseBody::Failure { error, trace } => Err(PipelineError::StageFailed {
                stage: stage.name.to_string(),
                worker: stage.worker,
                error,
                trace,
            }),
        }
    }

    /// The configured command, or this executable re-invoked as `worker <kind>`
    fn command_for(&self, kind: WorkerKind) -> Result<WorkerCommand, PipelineError> {
        if let Some(command) = self.config.workers.command_for(kind) {
            return Ok(command.clone());
        }
        let program = std::env::current_exe().map_err(|source| PipelineError::Launch {
            worker: kind,
            source: IpcError::Spawn {
                worker: kind.to_string(),
                source,
            },
        })?;
        Ok(WorkerCommand::self_hosted(program, kind))
    }
}

fn call_error(stage: &Stage, e: IpcError) -> PipelineError {
    if e.is_transport() {
        PipelineError::Transport {
            stage: stage.name.to_string(),
            worker: stage.worker,
            source: e,
        }
    } else {
        PipelineError::InvalidResponse {
            stage: stage.name.to_string(),
            worker: stage.worker,
            reason: e.to_string(),
        }
    }
}

fn select_output(pipeline: &Pipeline, context: &PipelineContext) -> Result<JsonValue, PipelineError> {
    let selector = pipeline.output;
    let missing = |field: String| PipelineError::MissingField {
        stage: selector.stage.to_string(),
        worker: pipeline
            .stages
            .iter()
            .find(|stage| stage.name == selector.stage)
            .map(|stage| stage.worker)
            .unwrap_or(WorkerKind::Reporter),
        field,
    };

    match selector.field {
        Some(field) => context
            .field(selector.stage, field)
            .cloned()
            .map_err(|m| missing(m.0)),
        None => {
            let mut result = context
                .get(selector.stage)
                .cloned()
                .ok_or_else(|| missing(selector.stage.to_string()))?;
            if let Some(fields) = result.as_object_mut() {
                fields.remove("ok");
            }
            Ok(result)
        }
    }
}

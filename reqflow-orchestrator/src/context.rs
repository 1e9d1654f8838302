//! Results accumulated over one pipeline run

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

use reqflow_config::WorkerKind;

/// Key under which the run input is seeded
pub const INPUT_KEY: &str = "input";

/// What a run starts from
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineInput {
    /// Raw requirement text
    pub text: String,
    /// Search query for pipelines that rank chunks; the text is used when absent
    pub query: Option<String>,
    pub project_id: String,
}

impl PipelineInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            query: None,
            project_id: "default".to_string(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    fn to_value(&self) -> JsonValue {
        json!({
            "text": self.text,
            "query": self.query.as_deref().unwrap_or(&self.text),
            "project_id": self.project_id,
        })
    }
}

/// One completed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub worker: WorkerKind,
    pub method: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Result fields as the worker returned them
    pub result: JsonValue,
}

/// A field a stage needed but no earlier stage produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMissing(pub String);

impl fmt::Display for FieldMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage results in completion order, keyed by stage name
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    run_id: Uuid,
    input: JsonValue,
    stages: Vec<StageRecord>,
}

impl PipelineContext {
    pub fn new(run_id: Uuid, input: &PipelineInput) -> Self {
        Self {
            run_id,
            input: input.to_value(),
            stages: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Result of `stage`, or the run input for [`INPUT_KEY`]
    pub fn get(&self, stage: &str) -> Option<&JsonValue> {
        if stage == INPUT_KEY {
            return Some(&self.input);
        }
        self.stages
            .iter()
            .rev()
            .find(|record| record.stage == stage)
            .map(|record| &record.result)
    }

    /// `field` of `stage`'s result; `field` may be a `/`-separated path
    pub fn field(&self, stage: &str, field: &str) -> Result<&JsonValue, FieldMissing> {
        let pointer = format!("/{}", field.trim_start_matches('/'));
        self.get(stage)
            .and_then(|result| result.pointer(&pointer))
            .ok_or_else(|| FieldMissing(format!("{}.{}", stage, field.replace('/', "."))))
    }

    pub(crate) fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }
}

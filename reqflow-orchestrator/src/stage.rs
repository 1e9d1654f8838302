//! Pipelines as data: ordered stage descriptors plus an output selector

use serde_json::{json, Value as JsonValue};

use reqflow_config::WorkerKind;

use crate::context::{FieldMissing, PipelineContext, INPUT_KEY};

/// Builds a stage's request params from the results so far
pub type ParamsBuilder = fn(&PipelineContext) -> Result<JsonValue, FieldMissing>;

/// One request/response exchange with one worker
#[derive(Clone)]
pub struct Stage {
    /// Key of the stage's result in the context
    pub name: &'static str,
    pub worker: WorkerKind,
    pub method: &'static str,
    pub params: ParamsBuilder,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("worker", &self.worker)
            .field("method", &self.method)
            .finish()
    }
}

/// Which part of which stage's result is the run's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSelector {
    pub stage: &'static str,
    /// `None` selects the whole result
    pub field: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: &'static str,
    pub stages: Vec<Stage>,
    pub output: OutputSelector,
}

impl Pipeline {
    /// Names accepted by [`Pipeline::by_name`]
    pub const NAMES: [&'static str; 2] = ["requirements-report", "semantic-analysis"];

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "requirements-report" => Some(Self::requirements_report()),
            "semantic-analysis" => Some(Self::semantic_analysis()),
            _ => None,
        }
    }

    /// Every worker kind the stages use, each once, in first-use order
    pub fn required_workers(&self) -> Vec<WorkerKind> {
        let mut kinds = Vec::new();
        for stage in &self.stages {
            if !kinds.contains(&stage.worker) {
                kinds.push(stage.worker);
            }
        }
        kinds
    }

    /// Raw text to stories to prioritized requirements to a summary report
    pub fn requirements_report() -> Self {
        Self {
            name: "requirements-report",
            stages: vec![
                collect_stage(),
                normalize_stage(),
                extract_stories_stage(),
                Stage {
                    name: "analyze_stories",
                    worker: WorkerKind::Analyzer,
                    method: "analyze_stories",
                    params: |ctx| Ok(json!({ "stories": ctx.field("extract_stories", "stories")? })),
                },
                identify_requirements_stage(),
                prioritize_stage(),
                Stage {
                    name: "generate_report",
                    worker: WorkerKind::Reporter,
                    method: "generate_report",
                    params: |ctx| {
                        Ok(json!({ "requirements": ctx.field("prioritize", "requirements")? }))
                    },
                },
            ],
            output: OutputSelector {
                stage: "generate_report",
                field: Some("report"),
            },
        }
    }

    /// Index the text, analyze the chunks closest to the query, and build
    /// the final report from the prioritized requirements and that analysis
    pub fn semantic_analysis() -> Self {
        Self {
            name: "semantic-analysis",
            stages: vec![
                collect_stage(),
                normalize_stage(),
                Stage {
                    name: "index",
                    worker: WorkerKind::Vector,
                    method: "ingest",
                    params: index_params,
                },
                Stage {
                    name: "search",
                    worker: WorkerKind::Vector,
                    method: "search",
                    params: |ctx| {
                        Ok(json!({ "query": ctx.field(INPUT_KEY, "query")?, "top_k": 3 }))
                    },
                },
                Stage {
                    name: "analyze_requirement",
                    worker: WorkerKind::Analyzer,
                    method: "analyze_requirement",
                    params: |ctx| Ok(json!({ "chunks": ctx.field("search", "result/documents")? })),
                },
                extract_stories_stage(),
                identify_requirements_stage(),
                prioritize_stage(),
                Stage {
                    name: "final_report",
                    worker: WorkerKind::Reporter,
                    method: "build_final_report",
                    params: |ctx| {
                        Ok(json!({
                            "core_requirements": ctx.field("prioritize", "requirements")?,
                            "analyzer_output": ctx.field("analyze_requirement", "result")?,
                            "project_id": ctx.field(INPUT_KEY, "project_id")?,
                        }))
                    },
                },
            ],
            output: OutputSelector {
                stage: "final_report",
                field: None,
            },
        }
    }
}

fn collect_stage() -> Stage {
    Stage {
        name: "collect",
        worker: WorkerKind::Collector,
        method: "ingest_raw",
        params: |ctx| Ok(json!({ "items": [ctx.field(INPUT_KEY, "text")?] })),
    }
}

fn normalize_stage() -> Stage {
    Stage {
        name: "normalize",
        worker: WorkerKind::Collector,
        method: "normalize",
        params: |ctx| Ok(json!({ "chunks": ctx.field("collect", "chunks")? })),
    }
}

fn extract_stories_stage() -> Stage {
    Stage {
        name: "extract_stories",
        worker: WorkerKind::Collector,
        method: "extract_stories",
        params: |ctx| Ok(json!({ "chunks": ctx.field("normalize", "chunks")? })),
    }
}

fn identify_requirements_stage() -> Stage {
    Stage {
        name: "identify_requirements",
        worker: WorkerKind::Requirement,
        method: "identify_requirements",
        params: |ctx| Ok(json!({ "stories": ctx.field("extract_stories", "stories")? })),
    }
}

fn prioritize_stage() -> Stage {
    Stage {
        name: "prioritize",
        worker: WorkerKind::Requirement,
        method: "prioritize",
        params: |ctx| {
            Ok(json!({ "requirements": ctx.field("identify_requirements", "requirements")? }))
        },
    }
}

/// One id and metadata entry per normalized chunk
fn index_params(ctx: &PipelineContext) -> Result<JsonValue, FieldMissing> {
    let chunks = ctx.field("normalize", "chunks")?;
    let project_id = ctx.field(INPUT_KEY, "project_id")?;
    let count = chunks.as_array().map(Vec::len).unwrap_or(0);

    let ids: Vec<String> = (1..=count).map(|n| format!("chunk-{}", n)).collect();
    let metadatas: Vec<JsonValue> = (0..count)
        .map(|position| json!({ "project_id": project_id, "position": position }))
        .collect();

    Ok(json!({ "ids": ids, "texts": chunks, "metadatas": metadatas }))
}

//! Reference worker services for the reqflow pipeline
//!
//! Each service plugs into [`reqflow_ipc::run_worker`] and owns whatever
//! state it keeps between requests. [`serve`] picks the service for a
//! [`WorkerKind`] and runs it on the process's stdin/stdout.

pub mod analyzer;
pub mod collector;
pub mod llm;
pub mod prompt;
pub mod reporter;
pub mod requirement;
pub mod types;
pub mod vector;

use serde_json::Value as JsonValue;

use reqflow_config::{ReqflowConfig, WorkerKind};
use reqflow_ipc::{serve_stdio, IpcError, JsonMap, WorkerStats};

pub use analyzer::{AnalyzerMethod, AnalyzerService};
pub use collector::{CollectorMethod, CollectorService};
pub use llm::{GeminiClient, LlmError, TextCompletion};
pub use prompt::{PromptError, PromptTemplates};
pub use reporter::{ReporterMethod, ReporterService};
pub use requirement::{RequirementMethod, RequirementService};
pub use types::{Category, Effort, Issue, IssueKind, Priority, Requirement, Story};
pub use vector::{VectorMethod, VectorService, VectorStore};

/// Serve one worker kind over stdio until stdin closes
pub async fn serve(kind: WorkerKind, config: &ReqflowConfig) -> Result<WorkerStats, IpcError> {
    match kind {
        WorkerKind::Collector => serve_stdio(CollectorService::new()).await,
        WorkerKind::Analyzer => serve_stdio(AnalyzerService::new()).await,
        WorkerKind::Requirement => serve_stdio(RequirementService::new()).await,
        WorkerKind::Reporter => serve_stdio(ReporterService::from_config(&config.llm)).await,
        WorkerKind::Vector => serve_stdio(VectorService::new()).await,
    }
}

/// Result fields from a JSON value; non-objects land under `value`
pub(crate) fn fields(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

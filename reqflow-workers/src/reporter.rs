//! Reporter worker: summaries, tables and diagrams over prioritized requirements

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use reqflow_config::{LlmConfig, WorkerKind};
use reqflow_ipc::{HandlerError, JsonMap, WorkerMethod, WorkerService};

use crate::fields;
use crate::llm::{GeminiClient, TextCompletion};
use crate::prompt::{PromptTemplates, FINAL_REPORT};
use crate::types::{issues_in, Requirement};

const TOP_REQUIREMENTS: usize = 5;
const CSV_HEADER: &str =
    "req_id,title,priority,priority_score,estimated_effort,confidence,recommended_action";

fn default_project_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ReporterMethod {
    GenerateReport {
        #[serde(default)]
        requirements: Vec<Requirement>,
    },
    Diagram {
        #[serde(default)]
        requirements: Vec<Requirement>,
    },
    MarkdownTable {
        #[serde(default)]
        requirements: Vec<Requirement>,
    },
    MermaidDiagram {
        #[serde(default)]
        requirements: Vec<Requirement>,
        #[serde(default)]
        edges: Option<Vec<(String, String)>>,
    },
    BuildFinalReport {
        #[serde(default)]
        core_requirements: Vec<Requirement>,
        #[serde(default)]
        analyzer_output: Option<JsonValue>,
        #[serde(default = "default_project_id")]
        project_id: String,
    },
}

impl WorkerMethod for ReporterMethod {
    const NAMES: &'static [&'static str] = &[
        "generate_report",
        "diagram",
        "markdown_table",
        "mermaid_diagram",
        "build_final_report",
    ];
}

/// Renders report artifacts; `build_final_report` asks the LLM first when
/// one is configured
#[derive(Default)]
pub struct ReporterService {
    llm: Option<Box<dyn TextCompletion>>,
    prompts: Option<PromptTemplates>,
}

impl ReporterService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(llm: Box<dyn TextCompletion>) -> Self {
        Self {
            llm: Some(llm),
            prompts: None,
        }
    }

    /// Use `prompts` instead of the built-in prompt where they define one
    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Without an API key, or with a client that cannot be built, the
    /// service runs on the deterministic artifacts only
    pub fn from_config(config: &LlmConfig) -> Self {
        let service = match GeminiClient::from_config(config) {
            Ok(Some(client)) => {
                info!(model = %config.model, "LLM synthesis enabled");
                Self::with_llm(Box::new(client))
            }
            Ok(None) => return Self::new(),
            Err(e) => {
                warn!("LLM client unavailable, using fallback reports: {}", e);
                return Self::new();
            }
        };

        let Some(path) = &config.prompt_file else {
            return service;
        };
        match PromptTemplates::from_file(path) {
            Ok(prompts) => {
                info!(path = ?path, "Loaded prompt templates");
                service.with_prompts(prompts)
            }
            Err(e) => {
                warn!("Ignoring prompt file, using built-in prompts: {}", e);
                service
            }
        }
    }

    /// The configured template for `build_final_report`, else the built-in text
    fn final_report_prompt(
        &self,
        project_id: &str,
        requirements: &[Requirement],
        analyzer_output: Option<&JsonValue>,
    ) -> String {
        if let Some(prompts) = &self.prompts {
            let data = prompt_data(project_id, requirements, analyzer_output);
            match prompts.render(FINAL_REPORT, &data) {
                Ok(Some(prompt)) => return prompt,
                Ok(None) => {}
                Err(e) => warn!(project_id, "Using built-in prompt: {}", e),
            }
        }
        builtin_final_report_prompt(project_id, requirements, analyzer_output)
    }

    async fn build_final_report(
        &self,
        requirements: &[Requirement],
        analyzer_output: Option<&JsonValue>,
        project_id: &str,
    ) -> JsonMap {
        if let Some(llm) = &self.llm {
            let prompt = self.final_report_prompt(project_id, requirements, analyzer_output);
            match llm.complete(&prompt).await {
                Ok(content) => {
                    return fields(json!({
                        "report": {
                            "llm_content": content,
                            "project_id": project_id,
                            "model": llm.model(),
                        }
                    }));
                }
                Err(e) => warn!(project_id, "LLM report failed, using fallback: {}", e),
            }
        }

        fields(json!({
            "final_report_markdown": final_report_markdown(project_id, requirements, analyzer_output),
            "final_report_csv": final_report_csv(requirements),
            "final_report_mermaid": mermaid_diagram(requirements, &[]),
        }))
    }
}

#[async_trait]
impl WorkerService for ReporterService {
    type Method = ReporterMethod;

    fn name(&self) -> &str {
        WorkerKind::Reporter.as_str()
    }

    async fn handle(&mut self, call: ReporterMethod) -> Result<JsonMap, HandlerError> {
        let result = match call {
            ReporterMethod::GenerateReport { requirements } => fields(json!({
                "report": generate_report(&requirements),
            })),
            ReporterMethod::Diagram { requirements } => fields(json!({
                "diagram": {
                    "type": "nodes",
                    "nodes": requirements.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
                }
            })),
            ReporterMethod::MarkdownTable { requirements } => fields(json!({
                "markdown": markdown_table(&requirements),
            })),
            ReporterMethod::MermaidDiagram {
                requirements,
                edges,
            } => fields(json!({
                "mermaid": mermaid_diagram(&requirements, edges.as_deref().unwrap_or_default()),
            })),
            ReporterMethod::BuildFinalReport {
                core_requirements,
                analyzer_output,
                project_id,
            } => {
                self.build_final_report(&core_requirements, analyzer_output.as_ref(), &project_id)
                    .await
            }
        };
        Ok(result)
    }
}

pub fn generate_report(requirements: &[Requirement]) -> JsonValue {
    let items: Vec<JsonValue> = requirements
        .iter()
        .map(|r| json!({ "id": r.id, "title": r.title, "priority": r.priority }))
        .collect();
    json!({
        "count": requirements.len(),
        "items": items,
        "generated_at": Utc::now().to_rfc3339(),
    })
}

pub fn markdown_table(requirements: &[Requirement]) -> String {
    let mut lines = vec![
        "| id | title | priority |".to_string(),
        "|---|---|---|".to_string(),
    ];
    lines.extend(requirements.iter().map(|r| {
        format!(
            "| {} | {} | {} |",
            escape_cell(&r.id),
            escape_cell(&r.title),
            r.priority_label()
        )
    }));
    lines.join("\n")
}

/// `graph TD` with one labelled node per requirement, then the edges
pub fn mermaid_diagram(requirements: &[Requirement], edges: &[(String, String)]) -> String {
    let mut lines = vec!["graph TD".to_string()];
    lines.extend(
        requirements
            .iter()
            .map(|r| format!("    {}[\"{}\"]", r.id, r.title.replace('"', "#quot;"))),
    );
    lines.extend(edges.iter().map(|(from, to)| format!("    {} --> {}", from, to)));
    lines.join("\n")
}

pub fn final_report_markdown(
    project_id: &str,
    requirements: &[Requirement],
    analyzer_output: Option<&JsonValue>,
) -> String {
    let top = &requirements[..requirements.len().min(TOP_REQUIREMENTS)];

    let mut out = format!(
        "# Executive Summary\n\nProject: {}\n\nRequirements analysed: {}\n\n## Top requirements\n\n{}",
        project_id,
        requirements.len(),
        markdown_table(top)
    );

    let issues = analyzer_output.map(issues_in).unwrap_or_default();
    if !issues.is_empty() {
        out.push_str("\n\n## Analyzer findings\n");
        for issue in &issues {
            out.push_str("\n- ");
            if let Some(story) = &issue.story_id {
                out.push_str(&format!("[{}] ", story));
            }
            out.push_str(&issue.description);
        }
    }
    out
}

pub fn final_report_csv(requirements: &[Requirement]) -> String {
    let mut lines = vec![CSV_HEADER.to_string()];
    for r in requirements {
        let row = [
            r.id.clone(),
            r.title.clone(),
            r.priority_label().to_string(),
            r.score.map(|s| s.to_string()).unwrap_or_default(),
            r.estimated_effort
                .map(|e| e.as_str().to_string())
                .unwrap_or_default(),
            r.confidence.map(|c| c.to_string()).unwrap_or_default(),
            r.recommended_action.clone().unwrap_or_default(),
        ];
        lines.push(row.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

fn builtin_final_report_prompt(
    project_id: &str,
    requirements: &[Requirement],
    analyzer_output: Option<&JsonValue>,
) -> String {
    let requirements_json = serde_json::to_string_pretty(requirements).unwrap_or_default();
    let analysis_json = analyzer_output
        .map(|output| serde_json::to_string_pretty(output).unwrap_or_default())
        .unwrap_or_else(|| "{}".to_string());
    format!(
        "You are a senior business analyst. Write the final requirements report for project \
         \"{project_id}\" in Markdown. Start with an executive summary, then list the top \
         requirements with their priority and recommended action, then summarise the quality \
         findings.\n\nPrioritized requirements (JSON):\n{requirements_json}\n\nAnalyzer output \
         (JSON):\n{analysis_json}\n"
    )
}

/// Template variables: the values themselves plus their pretty JSON text
fn prompt_data(
    project_id: &str,
    requirements: &[Requirement],
    analyzer_output: Option<&JsonValue>,
) -> JsonValue {
    let analyzer_output = analyzer_output.cloned().unwrap_or_else(|| json!({}));
    json!({
        "project_id": project_id,
        "core_requirements": requirements,
        "core_requirements_json": serde_json::to_string_pretty(requirements).unwrap_or_default(),
        "analyzer_output_json": serde_json::to_string_pretty(&analyzer_output).unwrap_or_default(),
        "analyzer_output": analyzer_output,
    })
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::types::{Effort, Priority};

    fn ranked() -> Vec<Requirement> {
        vec![
            Requirement {
                id: "REQ-2".to_string(),
                title: "Admin Report Access".to_string(),
                priority: Some(Priority::High),
                score: Some(75),
                estimated_effort: Some(Effort::M),
                confidence: Some(0.9),
                recommended_action: Some("Schedule for the next iteration".to_string()),
                ..Default::default()
            },
            Requirement {
                id: "REQ-1".to_string(),
                title: "Export, \"fast\" | CSV".to_string(),
                priority: Some(Priority::Medium),
                score: Some(50),
                ..Default::default()
            },
        ]
    }

    struct FixedLlm(Result<&'static str, ()>);

    #[async_trait]
    impl TextCompletion for FixedLlm {
        fn model(&self) -> &str {
            "fixed-model"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            assert!(prompt.contains("REQ-2"));
            self.0
                .map(str::to_string)
                .map_err(|_| LlmError::EmptyResponse)
        }
    }

    /// Answers with the prompt it was given
    struct EchoLlm;

    #[async_trait]
    impl TextCompletion for EchoLlm {
        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            Ok(prompt.to_string())
        }
    }

    async fn echoed_prompt(prompts: &str, analyzer_output: Option<JsonValue>) -> String {
        let mut service = ReporterService::with_llm(Box::new(EchoLlm))
            .with_prompts(PromptTemplates::from_yaml_str(prompts).unwrap());
        let result = service
            .handle(ReporterMethod::BuildFinalReport {
                core_requirements: ranked(),
                analyzer_output,
                project_id: "analytics".to_string(),
            })
            .await
            .unwrap();
        result["report"]["llm_content"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_generate_report_items() {
        let mut service = ReporterService::new();
        let result = service
            .handle(ReporterMethod::GenerateReport {
                requirements: ranked(),
            })
            .await
            .unwrap();

        let report = &result["report"];
        assert_eq!(report["count"], json!(2));
        assert_eq!(
            report["items"][0],
            json!({"id": "REQ-2", "title": "Admin Report Access", "priority": "High"})
        );
        assert!(report["generated_at"].is_string());
    }

    #[tokio::test]
    async fn test_diagram_nodes() {
        let mut service = ReporterService::new();
        let result = service
            .handle(ReporterMethod::Diagram {
                requirements: ranked(),
            })
            .await
            .unwrap();
        assert_eq!(
            result["diagram"],
            json!({"type": "nodes", "nodes": ["REQ-2", "REQ-1"]})
        );
    }

    #[test]
    fn test_markdown_table_escapes_pipes() {
        let table = markdown_table(&ranked());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| id | title | priority |");
        assert_eq!(lines[1], "|---|---|---|");
        assert_eq!(lines[2], "| REQ-2 | Admin Report Access | High |");
        assert_eq!(lines[3], "| REQ-1 | Export, \"fast\" \\| CSV | Medium |");
    }

    #[test]
    fn test_mermaid_with_edges() {
        let edges = vec![("REQ-2".to_string(), "REQ-1".to_string())];
        let mermaid = mermaid_diagram(&ranked(), &edges);
        assert_eq!(
            mermaid,
            "graph TD\n    REQ-2[\"Admin Report Access\"]\n    REQ-1[\"Export, #quot;fast#quot; | CSV\"]\n    REQ-2 --> REQ-1"
        );
    }

    #[test]
    fn test_csv_quotes_fields() {
        let csv = final_report_csv(&ranked());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "REQ-2,Admin Report Access,High,75,M,0.9,Schedule for the next iteration"
        );
        assert_eq!(lines[2], "REQ-1,\"Export, \"\"fast\"\" | CSV\",Medium,50,,,");
    }

    #[tokio::test]
    async fn test_final_report_fallback() {
        let mut service = ReporterService::new();
        let analyzer_output = json!({"result": {"issues": [{
            "type": "ambiguity",
            "story_id": "US-1",
            "keyword": "fast",
            "description": "Found ambiguous term 'fast'."
        }]}});
        let result = service
            .handle(ReporterMethod::BuildFinalReport {
                core_requirements: ranked(),
                analyzer_output: Some(analyzer_output),
                project_id: "demo".to_string(),
            })
            .await
            .unwrap();

        let markdown = result["final_report_markdown"].as_str().unwrap();
        assert!(markdown.starts_with("# Executive Summary"));
        assert!(markdown.contains("Project: demo"));
        assert!(markdown.contains("- [US-1] Found ambiguous term 'fast'."));
        assert!(result["final_report_csv"]
            .as_str()
            .unwrap()
            .starts_with(CSV_HEADER));
        assert!(result["final_report_mermaid"]
            .as_str()
            .unwrap()
            .starts_with("graph TD"));
        assert!(result.get("report").is_none());
    }

    #[test]
    fn test_top_requirements_are_capped() {
        let many: Vec<Requirement> = (1..=8)
            .map(|n| Requirement {
                id: format!("REQ-{}", n),
                title: "Item".to_string(),
                ..Default::default()
            })
            .collect();
        let markdown = final_report_markdown("default", &many, None);
        assert!(markdown.contains("| REQ-5 |"));
        assert!(!markdown.contains("| REQ-6 |"));
        assert!(!markdown.contains("Analyzer findings"));
    }

    #[tokio::test]
    async fn test_final_report_uses_llm() {
        let mut service = ReporterService::with_llm(Box::new(FixedLlm(Ok("# Final report"))));
        let result = service
            .handle(ReporterMethod::BuildFinalReport {
                core_requirements: ranked(),
                analyzer_output: None,
                project_id: "default".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            result["report"],
            json!({"llm_content": "# Final report", "project_id": "default", "model": "fixed-model"})
        );
        assert!(result.get("final_report_csv").is_none());
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let mut service = ReporterService::with_llm(Box::new(FixedLlm(Err(()))));
        let result = service
            .handle(ReporterMethod::BuildFinalReport {
                core_requirements: ranked(),
                analyzer_output: None,
                project_id: "default".to_string(),
            })
            .await
            .unwrap();

        assert!(result.get("report").is_none());
        assert!(result["final_report_markdown"].is_string());
    }

    #[tokio::test]
    async fn test_final_report_prompt_from_template() {
        let prompts = r#"
prompts:
  build_final_report:
    template: "{{project_id}}|{{#each core_requirements}}{{id}}:{{priority}};{{/each}}|{{analyzer_output.summary}}"
"#;
        let prompt = echoed_prompt(prompts, Some(json!({"summary": "two stories"}))).await;
        assert_eq!(prompt, "analytics|REQ-2:High;REQ-1:Medium;|two stories");
    }

    #[tokio::test]
    async fn test_final_report_prompt_falls_back_to_builtin() {
        let other_prompt_only = "prompts:\n  summary:\n    template: \"{{project_id}}\"\n";
        let prompt = echoed_prompt(other_prompt_only, None).await;
        assert!(prompt.contains("senior business analyst"));
        assert!(prompt.contains("\"analytics\""));

        let unrenderable = "prompts:\n  build_final_report:\n    template: \"{{no_such_field}}\"\n";
        let prompt = echoed_prompt(unrenderable, None).await;
        assert!(prompt.contains("senior business analyst"));
    }

    #[test]
    fn test_project_id_defaults() {
        let call: ReporterMethod = serde_json::from_value(json!({
            "method": "build_final_report",
            "params": {"core_requirements": []}
        }))
        .unwrap();
        match call {
            ReporterMethod::BuildFinalReport { project_id, .. } => assert_eq!(project_id, "default"),
            other => panic!("unexpected call {:?}", other),
        }
    }
}

//! Analyzer worker: rule-based quality checks over text and stories

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use reqflow_config::WorkerKind;
use reqflow_ipc::{HandlerError, JsonMap, WorkerMethod, WorkerService};

use crate::fields;
use crate::types::{Issue, IssueKind, Story};

/// Terms that usually stand in for a measurable criterion
pub const AMBIGUOUS_TERMS: [&str; 6] = [
    "soon",
    "appropriate",
    "fast",
    "quickly",
    "as needed",
    "user friendly",
];

const DEFAULT_SUMMARY_CHARS: usize = 400;

static AMBIGUOUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    AMBIGUOUS_TERMS
        .iter()
        .map(|term| {
            // "user friendly" also matches "user-friendly"
            let body = regex::escape(term).replace(' ', r"[\s-]+");
            let pattern = format!(r"(?i)\b{}\b", body);
            (*term, Regex::new(&pattern).expect("valid regex"))
        })
        .collect()
});

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalyzeOptions {
    pub summary_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AnalyzerMethod {
    AnalyzeRequirement {
        #[serde(default)]
        chunks: Vec<String>,
        #[serde(default)]
        options: AnalyzeOptions,
    },
    AnalyzeStories {
        #[serde(default)]
        stories: Vec<Story>,
    },
}

impl WorkerMethod for AnalyzerMethod {
    const NAMES: &'static [&'static str] = &["analyze_requirement", "analyze_stories"];
}

#[derive(Debug, Default)]
pub struct AnalyzerService;

impl AnalyzerService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerService for AnalyzerService {
    type Method = AnalyzerMethod;

    fn name(&self) -> &str {
        WorkerKind::Analyzer.as_str()
    }

    async fn handle(&mut self, call: AnalyzerMethod) -> Result<JsonMap, HandlerError> {
        match call {
            AnalyzerMethod::AnalyzeRequirement { chunks, options } => {
                let summary_chars = options.summary_chars.unwrap_or(DEFAULT_SUMMARY_CHARS);
                let all_text = chunks.join("\n\n");
                let issues = detect_ambiguous_terms(&all_text, None);
                Ok(fields(json!({
                    "result": {
                        "summary": all_text.chars().take(summary_chars).collect::<String>(),
                        "issues": serde_json::to_value(&issues)?,
                    }
                })))
            }
            AnalyzerMethod::AnalyzeStories { stories } => {
                let issues = analyze_stories(&stories);
                Ok(fields(json!({
                    "result": {
                        "issues": serde_json::to_value(&issues)?,
                        "story_count": stories.len(),
                    }
                })))
            }
        }
    }
}

/// Ambiguous terms present in `text`, matched on word boundaries
pub fn find_ambiguous_terms(text: &str) -> Vec<&'static str> {
    AMBIGUOUS_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(term, _)| *term)
        .collect()
}

pub fn detect_ambiguous_terms(text: &str, story_id: Option<&str>) -> Vec<Issue> {
    find_ambiguous_terms(text)
        .into_iter()
        .map(|term| Issue {
            kind: IssueKind::Ambiguity,
            story_id: story_id.map(str::to_string),
            keyword: Some(term.to_string()),
            stories: Vec::new(),
            description: format!(
                "Found ambiguous term '{}'. Consider specifying measurable criteria.",
                term
            ),
        })
        .collect()
}

pub fn detect_missing_acceptance_criteria(stories: &[Story]) -> Vec<Issue> {
    stories
        .iter()
        .filter(|story| story.acceptance_criteria.is_empty())
        .map(|story| Issue {
            kind: IssueKind::Missing,
            story_id: Some(story.id.clone()),
            keyword: None,
            stories: Vec::new(),
            description: format!(
                "User story '{}' has no acceptance criteria.",
                display_title(story)
            ),
        })
        .collect()
}

/// An earlier story restricting something to admins and a later one opening
/// it to everyone
pub fn cross_check_conflicts(stories: &[Story]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (i, first) in stories.iter().enumerate() {
        if !first.description.to_lowercase().contains("only admin") {
            continue;
        }
        for second in &stories[i + 1..] {
            if second.description.to_lowercase().contains("everyone") {
                issues.push(Issue {
                    kind: IssueKind::Conflict,
                    story_id: None,
                    keyword: None,
                    stories: vec![first.id.clone(), second.id.clone()],
                    description: format!(
                        "Possible conflict between stories '{}' and '{}': one restricts to admins, the other allows everyone.",
                        display_title(first),
                        display_title(second)
                    ),
                });
            }
        }
    }
    issues
}

/// Every check, ambiguity first, in story order
pub fn analyze_stories(stories: &[Story]) -> Vec<Issue> {
    let mut issues: Vec<Issue> = stories
        .iter()
        .flat_map(|story| detect_ambiguous_terms(&story.full_text(), Some(story.id.as_str())))
        .collect();
    issues.extend(detect_missing_acceptance_criteria(stories));
    issues.extend(cross_check_conflicts(stories));
    issues
}

fn display_title(story: &Story) -> &str {
    if story.title.is_empty() {
        "(no title)"
    } else {
        &story.title
    }
}

//! Requirement worker: stories become requirements, requirements get ranked

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use reqflow_config::WorkerKind;
use reqflow_ipc::{HandlerError, JsonMap, WorkerMethod, WorkerService};

use crate::analyzer::find_ambiguous_terms;
use crate::fields;
use crate::types::{Category, Effort, Priority, Requirement, Story};

static SECURITY_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(admins?|access|permissions?|roles?|sensitive|secure|security|auth\w*|login|passwords?|encrypt\w*|privacy)\b")
        .expect("valid regex")
});
static PERFORMANCE_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(fast|quick\w*|latency|performance|loads?|speed|seconds?|ms|throughput|scal\w*)\b")
        .expect("valid regex")
});
static MANDATORY_TERMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(must|critical|required|mandatory)\b").expect("valid regex"));

const BASE_SCORE: i32 = 50;

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RequirementMethod {
    IdentifyRequirements {
        #[serde(default)]
        stories: Vec<Story>,
    },
    Prioritize {
        #[serde(default)]
        requirements: Vec<Requirement>,
    },
}

impl WorkerMethod for RequirementMethod {
    const NAMES: &'static [&'static str] = &["identify_requirements", "prioritize"];
}

#[derive(Debug, Default)]
pub struct RequirementService;

impl RequirementService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerService for RequirementService {
    type Method = RequirementMethod;

    fn name(&self) -> &str {
        WorkerKind::Requirement.as_str()
    }

    async fn handle(&mut self, call: RequirementMethod) -> Result<JsonMap, HandlerError> {
        let requirements = match call {
            RequirementMethod::IdentifyRequirements { stories } => identify_requirements(&stories),
            RequirementMethod::Prioritize { requirements } => prioritize(requirements),
        };
        Ok(fields(json!({
            "count": requirements.len(),
            "requirements": serde_json::to_value(&requirements)?,
        })))
    }
}

/// One requirement per story, in story order
pub fn identify_requirements(stories: &[Story]) -> Vec<Requirement> {
    stories
        .iter()
        .enumerate()
        .map(|(index, story)| {
            let text = story.full_text();
            Requirement {
                id: format!("REQ-{}", index + 1),
                title: story.title.clone(),
                description: story.description.clone(),
                acceptance_criteria: story.acceptance_criteria.clone(),
                source_story: (!story.id.is_empty()).then(|| story.id.clone()),
                category: Some(categorize(&text)),
                ..Default::default()
            }
        })
        .collect()
}

pub fn categorize(text: &str) -> Category {
    if SECURITY_TERMS.is_match(text) {
        Category::Security
    } else if PERFORMANCE_TERMS.is_match(text) {
        Category::Performance
    } else {
        Category::Functional
    }
}

/// Score every requirement and sort by score, highest first.
///
/// The sort is stable so equal scores keep their incoming order.
pub fn prioritize(requirements: Vec<Requirement>) -> Vec<Requirement> {
    let mut ranked: Vec<Requirement> = requirements.into_iter().map(assess).collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

fn assess(mut requirement: Requirement) -> Requirement {
    let text = requirement.full_text();
    let category = requirement
        .category
        .unwrap_or_else(|| categorize(&text));
    let ambiguous = find_ambiguous_terms(&text);
    let criteria = requirement.acceptance_criteria.len();

    let mut score = BASE_SCORE;
    score += match category {
        Category::Security => 25,
        Category::Performance => 10,
        Category::Functional => 0,
    };
    if MANDATORY_TERMS.is_match(&text) {
        score += 10;
    }
    score += match criteria {
        0 => -15,
        1..=2 => 0,
        _ => 5,
    };
    score -= (5 * ambiguous.len() as i32).min(15);
    let score = score.clamp(0, 100) as u32;

    let priority = Priority::from_score(score);

    let mut confidence: f64 = 0.9;
    if criteria == 0 {
        confidence -= 0.3;
    }
    confidence -= 0.1 * ambiguous.len() as f64;
    let confidence = (confidence.max(0.3) * 100.0).round() / 100.0;

    let effort = match criteria {
        0..=1 => Effort::S,
        2..=3 => Effort::M,
        _ => Effort::L,
    };

    let action = if !ambiguous.is_empty() {
        format!(
            "Clarify ambiguous wording ({}) before scheduling",
            ambiguous.join(", ")
        )
    } else if criteria == 0 {
        "Define acceptance criteria before scheduling".to_string()
    } else {
        match priority {
            Priority::High => "Schedule for the next iteration".to_string(),
            Priority::Medium => "Plan for an upcoming iteration".to_string(),
            Priority::Low => "Keep in the backlog".to_string(),
        }
    };

    requirement.category = Some(category);
    requirement.score = Some(score);
    requirement.priority = Some(priority);
    requirement.estimated_effort = Some(effort);
    requirement.confidence = Some(confidence);
    requirement.recommended_action = Some(action);
    requirement
}

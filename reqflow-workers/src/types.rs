//! Records passed between workers

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reqflow_ipc::JsonMap;

/// A user story extracted from raw text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
}

impl Story {
    /// Title, description and criteria as one block of text
    pub fn full_text(&self) -> String {
        let mut parts = vec![self.title.as_str(), self.description.as_str()];
        parts.extend(self.acceptance_criteria.iter().map(String::as_str));
        parts.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Functional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_score(score: u32) -> Self {
        match score {
            75.. => Priority::High,
            50..=74 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effort {
    S,
    M,
    L,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::S => "S",
            Effort::M => "M",
            Effort::L => "L",
        }
    }
}

/// A requirement derived from a story; the prioritization fields are filled in
/// by `prioritize`. Fields this crate does not know are carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<Effort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Requirement {
    pub fn full_text(&self) -> String {
        let mut parts = vec![self.title.as_str(), self.description.as_str()];
        parts.extend(self.acceptance_criteria.iter().map(String::as_str));
        parts.join("\n")
    }

    pub fn priority_label(&self) -> &str {
        self.priority.as_ref().map(Priority::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Ambiguity,
    Missing,
    Conflict,
}

/// A finding reported by the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stories: Vec<String>,
    pub description: String,
}

/// Issues carried by an analyzer result, wherever the caller nested them
pub fn issues_in(output: &JsonValue) -> Vec<Issue> {
    let candidates = [
        output.pointer("/result/issues"),
        output.pointer("/issues"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|issues| serde_json::from_value(issues.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_bands() {
        assert_eq!(Priority::from_score(100), Priority::High);
        assert_eq!(Priority::from_score(75), Priority::High);
        assert_eq!(Priority::from_score(74), Priority::Medium);
        assert_eq!(Priority::from_score(50), Priority::Medium);
        assert_eq!(Priority::from_score(49), Priority::Low);
    }

    #[test]
    fn test_requirement_keeps_unknown_fields() {
        let value = json!({
            "id": "REQ-9",
            "title": "Audit log",
            "owner": "platform",
            "priority": "High"
        });
        let requirement: Requirement = serde_json::from_value(value).unwrap();
        assert_eq!(requirement.priority, Some(Priority::High));
        assert_eq!(requirement.extra["owner"], json!("platform"));

        let back = serde_json::to_value(&requirement).unwrap();
        assert_eq!(back["owner"], json!("platform"));
        assert!(back.get("score").is_none());
    }

    #[test]
    fn test_issues_in_nested_and_flat_output() {
        let issue = json!({"type": "missing", "description": "no criteria"});
        assert_eq!(issues_in(&json!({"result": {"issues": [issue.clone()]}})).len(), 1);
        assert_eq!(issues_in(&json!({"issues": [issue]})).len(), 1);
        assert!(issues_in(&json!({"summary": "nothing"})).is_empty());
    }
}

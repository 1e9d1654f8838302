//! Collector worker: raw text in, paragraphs and user stories out

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use reqflow_config::WorkerKind;
use reqflow_ipc::{HandlerError, JsonMap, WorkerMethod, WorkerService};

use crate::types::Story;
use crate::fields;

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s+(.*)$").expect("valid regex"));
static STORY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:user\s+)?story\s*:\s*(.*)$").expect("valid regex"));
static CRITERIA_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^acceptance\s+criteria\s*(?::\s*(.*))?$").expect("valid regex"));

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum CollectorMethod {
    IngestRaw { items: Vec<String> },
    Normalize { chunks: Vec<String> },
    ExtractStories { chunks: Vec<String> },
}

impl WorkerMethod for CollectorMethod {
    const NAMES: &'static [&'static str] = &["ingest_raw", "normalize", "extract_stories"];
}

#[derive(Debug, Default)]
pub struct CollectorService;

impl CollectorService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerService for CollectorService {
    type Method = CollectorMethod;

    fn name(&self) -> &str {
        WorkerKind::Collector.as_str()
    }

    async fn handle(&mut self, call: CollectorMethod) -> Result<JsonMap, HandlerError> {
        match call {
            CollectorMethod::IngestRaw { items } => {
                let chunks = split_paragraphs(&items);
                Ok(fields(json!({ "count": chunks.len(), "chunks": chunks })))
            }
            CollectorMethod::Normalize { chunks } => {
                let chunks: Vec<String> = chunks
                    .iter()
                    .map(|chunk| normalize_chunk(chunk))
                    .filter(|chunk| !chunk.is_empty())
                    .collect();
                Ok(fields(json!({ "chunks": chunks })))
            }
            CollectorMethod::ExtractStories { chunks } => {
                let stories = extract_stories(&chunks);
                Ok(fields(json!({
                    "count": stories.len(),
                    "stories": serde_json::to_value(&stories)?,
                })))
            }
        }
    }
}

/// Split every item on blank lines, dropping empty paragraphs
pub fn split_paragraphs(items: &[String]) -> Vec<String> {
    items
        .iter()
        .flat_map(|item| PARAGRAPH_BREAK.split(item))
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_string)
        .collect()
}

/// Trim lines, collapse runs of whitespace, unify bullets and drop empty lines
pub fn normalize_chunk(chunk: &str) -> String {
    chunk
        .lines()
        .map(|line| WHITESPACE.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix("* ").or_else(|| line.strip_prefix("• ")) {
            Some(rest) => format!("- {}", rest),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `Story:` blocks with an optional `Acceptance Criteria:` bullet list.
///
/// Text without any story header is read as one story per chunk, titled by
/// its first line.
pub fn extract_stories(chunks: &[String]) -> Vec<Story> {
    let has_headers = chunks
        .iter()
        .flat_map(|chunk| chunk.lines())
        .any(|line| STORY_HEADER.is_match(line.trim()));

    let mut stories = if has_headers {
        parse_headed_stories(chunks)
    } else {
        chunks
            .iter()
            .filter_map(|chunk| parse_untitled_story(chunk))
            .collect()
    };

    for (index, story) in stories.iter_mut().enumerate() {
        story.id = format!("US-{}", index + 1);
    }
    stories
}

#[derive(Default)]
struct StoryBuilder {
    title: String,
    description: Vec<String>,
    criteria: Vec<String>,
    in_criteria: bool,
}

impl StoryBuilder {
    fn push_line(&mut self, line: &str) {
        if let Some(caps) = CRITERIA_HEADER.captures(line) {
            self.in_criteria = true;
            let inline = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !inline.is_empty() {
                self.criteria.push(inline.to_string());
            }
            return;
        }

        if !self.in_criteria {
            self.description.push(line.to_string());
            return;
        }

        if let Some(caps) = BULLET.captures(line) {
            self.criteria.push(caps[1].trim().to_string());
        } else if let Some(last) = self.criteria.last_mut() {
            // Wrapped continuation of the previous criterion
            last.push(' ');
            last.push_str(line);
        } else {
            self.criteria.push(line.to_string());
        }
    }

    fn build(self) -> Story {
        Story {
            id: String::new(),
            title: self.title,
            description: self.description.join(" "),
            acceptance_criteria: self.criteria,
        }
    }
}

fn parse_headed_stories(chunks: &[String]) -> Vec<Story> {
    let mut stories = Vec::new();
    let mut current: Option<StoryBuilder> = None;

    for line in chunks.iter().flat_map(|chunk| chunk.lines()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = STORY_HEADER.captures(line) {
            if let Some(done) = current.take() {
                stories.push(done.build());
            }
            current = Some(StoryBuilder {
                title: caps[1].trim().to_string(),
                ..Default::default()
            });
            continue;
        }

        // Text ahead of the first header belongs to no story
        if let Some(builder) = current.as_mut() {
            builder.push_line(line);
        }
    }

    if let Some(done) = current {
        stories.push(done.build());
    }
    stories
}

fn parse_untitled_story(chunk: &str) -> Option<Story> {
    let mut lines = chunk.lines().map(str::trim).filter(|line| !line.is_empty());
    let first = lines.next()?;

    let mut builder = StoryBuilder {
        title: first.chars().take(80).collect(),
        ..Default::default()
    };
    builder.push_line(first);
    for line in lines {
        builder.push_line(line);
    }
    Some(builder.build())
}

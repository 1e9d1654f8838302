//! Prompt templates for LLM calls
//!
//! A prompt file is YAML with one handlebars template per prompt:
//!
//! ```yaml
//! prompts:
//!   build_final_report:
//!     template: |
//!       Final report for {{project_id}}:
//!       {{#each core_requirements}}- {{id}} {{title}} ({{priority}})
//!       {{/each}}
//! ```

use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FINAL_REPORT: &str = "build_final_report";

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Failed to read prompt file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse prompt file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid template for prompt {name}: {source}")]
    Template {
        name: String,
        source: Box<handlebars::TemplateError>,
    },

    #[error("Failed to render prompt {name}: {source}")]
    Render {
        name: String,
        source: Box<handlebars::RenderError>,
    },
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    prompts: BTreeMap<String, PromptEntry>,
}

#[derive(Debug, Deserialize)]
struct PromptEntry {
    template: String,
}

/// Named prompt templates compiled once when the worker starts
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    handlebars: Handlebars<'static>,
}

impl PromptTemplates {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PromptError> {
        let file: PromptFile = serde_yaml::from_str(content)?;

        let mut handlebars = Handlebars::new();
        // Missing variables are errors; prompts are plain text, not HTML
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, entry) in file.prompts {
            handlebars
                .register_template_string(&name, &entry.template)
                .map_err(|source| PromptError::Template {
                    name: name.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(Self { handlebars })
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }

    /// `Ok(None)` when the file defines no template under `name`
    pub fn render(&self, name: &str, data: &JsonValue) -> Result<Option<String>, PromptError> {
        if !self.has(name) {
            return Ok(None);
        }
        self.handlebars
            .render(name, data)
            .map(Some)
            .map_err(|source| PromptError::Render {
                name: name.to_string(),
                source: Box::new(source),
            })
    }
}

//! Vector worker: an in-memory term-frequency store with cosine ranking

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use reqflow_config::WorkerKind;
use reqflow_ipc::{HandlerError, JsonMap, WorkerMethod, WorkerService};

use crate::fields;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));

const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum VectorMethod {
    Ingest {
        ids: Vec<String>,
        texts: Vec<String>,
        #[serde(default)]
        metadatas: Option<Vec<JsonValue>>,
    },
    Search {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
}

impl WorkerMethod for VectorMethod {
    const NAMES: &'static [&'static str] = &["ingest", "search"];
}

#[derive(Debug, Clone)]
struct Document {
    id: String,
    text: String,
    metadata: JsonValue,
    terms: HashMap<String, f64>,
    norm: f64,
}

/// Query result in column form, nearest first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<JsonValue>,
    pub distances: Vec<f64>,
}

/// Documents kept in insertion order; re-ingesting an id replaces it in place
#[derive(Debug, Default)]
pub struct VectorStore {
    documents: Vec<Document>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn upsert(&mut self, id: String, text: String, metadata: JsonValue) {
        let terms = term_frequencies(&text);
        let norm = terms.values().map(|count| count * count).sum::<f64>().sqrt();
        let document = Document {
            id,
            text,
            metadata,
            terms,
            norm,
        };

        match self.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => self.documents.push(document),
        }
    }

    /// The `top_k` documents closest to `query`; distance is `1 - cosine`
    pub fn query(&self, query: &str, top_k: usize) -> SearchResult {
        let query_terms = term_frequencies(query);
        let query_norm = query_terms
            .values()
            .map(|count| count * count)
            .sum::<f64>()
            .sqrt();

        let mut scored: Vec<(f64, &Document)> = self
            .documents
            .iter()
            .map(|document| {
                let similarity = if document.norm == 0.0 || query_norm == 0.0 {
                    0.0
                } else {
                    let dot: f64 = query_terms
                        .iter()
                        .filter_map(|(term, count)| document.terms.get(term).map(|d| d * count))
                        .sum();
                    dot / (document.norm * query_norm)
                };
                (1.0 - similarity, document)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut result = SearchResult::default();
        for (distance, document) in scored.into_iter().take(top_k) {
            result.ids.push(document.id.clone());
            result.documents.push(document.text.clone());
            result.metadatas.push(document.metadata.clone());
            result.distances.push((distance * 10_000.0).round() / 10_000.0);
        }
        result
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for token in TOKEN.find_iter(text) {
        *terms.entry(token.as_str().to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

/// Owns the worker's one store for the life of the process
#[derive(Debug, Default)]
pub struct VectorService {
    store: VectorStore,
}

impl VectorService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerService for VectorService {
    type Method = VectorMethod;

    fn name(&self) -> &str {
        WorkerKind::Vector.as_str()
    }

    async fn handle(&mut self, call: VectorMethod) -> Result<JsonMap, HandlerError> {
        match call {
            VectorMethod::Ingest {
                ids,
                texts,
                metadatas,
            } => {
                if ids.len() != texts.len() {
                    return Err(HandlerError::InvalidInput(format!(
                        "{} ids but {} texts",
                        ids.len(),
                        texts.len()
                    )));
                }
                let metadatas = match metadatas {
                    Some(metadatas) if metadatas.len() != ids.len() => {
                        return Err(HandlerError::InvalidInput(format!(
                            "{} ids but {} metadatas",
                            ids.len(),
                            metadatas.len()
                        )))
                    }
                    Some(metadatas) => metadatas,
                    None => vec![JsonValue::Null; ids.len()],
                };

                let count = ids.len();
                for ((id, text), metadata) in ids.into_iter().zip(texts).zip(metadatas) {
                    self.store.upsert(id, text, metadata);
                }
                Ok(fields(json!({ "count": count, "total": self.store.len() })))
            }
            VectorMethod::Search { query, top_k } => {
                let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
                if top_k == 0 {
                    return Err(HandlerError::InvalidInput(
                        "top_k must be at least 1".to_string(),
                    ));
                }
                let result = self.store.query(&query, top_k);
                Ok(fields(json!({ "result": serde_json::to_value(&result)? })))
            }
        }
    }
}

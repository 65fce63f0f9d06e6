//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, search hits, and function
//! calls that flow through ingestion and question answering.

use serde::Serialize;
use serde_json::{Map, Value};

/// Raw text extracted from one uploaded file.
///
/// Pages are kept separate so chunks never straddle a page boundary and can
/// report the page they came from.
#[derive(Debug, Clone)]
pub struct Document {
    /// Where the text came from (saved upload path or filename).
    pub source: String,
    /// Page texts in document order.
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(source: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            source: source.into(),
            pages,
        }
    }

    /// Full text with pages joined by newlines.
    pub fn text(&self) -> String {
        self.pages.join("\n")
    }
}

/// A contiguous slice of a document page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub source: String,
    /// 1-based page number, when the document has page boundaries.
    pub page: Option<usize>,
    /// Character offset of `content` within its page.
    pub offset: usize,
}

/// A ranked passage returned by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    pub page: Option<usize>,
    /// Cosine similarity; higher is closer.
    pub score: f64,
}

/// Type and description of one function parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Static declaration of a callable capability, rendered into the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    /// Parameter name → spec, in declaration order.
    pub parameters: Vec<(String, ParameterSpec)>,
    pub required: Vec<String>,
}

impl FunctionDescriptor {
    /// OpenAI function-calling JSON shape.
    pub fn to_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, spec) in &self.parameters {
            properties.insert(
                name.clone(),
                serde_json::json!({ "type": spec.kind, "description": spec.description }),
            );
        }
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": self.required,
            }
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }
}

/// A function call requested by the model in its response.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallDirective {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Result status of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    /// Validation refused the call; the capability was never invoked.
    Rejected,
}

/// What happened when a detected directive was handled.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionOutcome {
    pub function: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl FunctionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Everything produced while answering one question.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub question: String,
    pub hits: Vec<SearchHit>,
    pub prompt: String,
    pub answer: String,
    pub function_outcome: Option<FunctionOutcome>,
}

impl QueryResult {
    /// `(source, score)` pairs in rank order.
    pub fn sources(&self) -> Vec<(String, f64)> {
        self.hits
            .iter()
            .map(|h| (h.source.clone(), h.score))
            .collect()
    }
}

/// Per-file acknowledgement for an upload batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub status: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const STATUS_UPLOADED: &str = "Successfully uploaded";
pub const STATUS_FAILED: &str = "Failed";

impl IngestStatus {
    pub fn uploaded(filename: impl Into<String>, chunks: usize) -> Self {
        Self {
            status: STATUS_UPLOADED.to_string(),
            filename: filename.into(),
            chunks: Some(chunks),
            error: None,
        }
    }

    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILED.to_string(),
            filename: filename.into(),
            chunks: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_UPLOADED
    }
}

//! Error taxonomy for the question-answering pipeline.
//!
//! [`QaError`] covers everything that can fail while ingesting a document or
//! answering a question. [`DispatchError`] covers function-call dispatch and
//! is never propagated to HTTP callers: it is always downgraded into a
//! [`FunctionOutcome`](crate::models::FunctionOutcome) that travels alongside
//! the generated answer.

use thiserror::Error;

/// Errors raised by the ingestion and query pipelines.
#[derive(Debug, Error)]
pub enum QaError {
    /// Malformed request: missing query, missing file, empty input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A document could not be read or its text could not be extracted.
    #[error("extraction failed for {file}: {message}")]
    Extraction { file: String, message: String },

    /// Chunking or other settings that can never produce a valid result.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The persisted vector index could not be opened, is corrupt, or holds
    /// vectors from a different embedding model.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The embedding service returned an error or an unusable response.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// An embedding call exceeded its configured bound.
    #[error("embedding timed out after {0}s")]
    EmbeddingTimeout(u64),

    /// The generation call exceeded its configured bound.
    #[error("generation timed out after {0}s")]
    GenerationTimeout(u64),

    /// The generation service returned an error.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// Local file I/O failed while persisting an upload.
    #[error("storage error: {0}")]
    Storage(String),
}

impl QaError {
    /// Machine-readable code used in HTTP error bodies and ingest statuses.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::Validation(_) => "bad_request",
            QaError::Extraction { .. } => "extraction_failed",
            QaError::InvalidConfiguration(_) => "invalid_configuration",
            QaError::IndexUnavailable(_) => "index_unavailable",
            QaError::EmbeddingFailure(_) => "embedding_failed",
            QaError::EmbeddingTimeout(_) => "embedding_timeout",
            QaError::GenerationTimeout(_) => "generation_timeout",
            QaError::GenerationFailure(_) => "generation_failed",
            QaError::Storage(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for QaError {
    fn from(err: sqlx::Error) -> Self {
        QaError::IndexUnavailable(err.to_string())
    }
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, QaError>;

/// Errors produced while validating or executing a function-call directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The directive names a function that is not registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// One or more required arguments are absent or of the wrong type.
    #[error("missing or invalid arguments for {function}: {}", .missing.join(", "))]
    MissingArguments {
        function: String,
        missing: Vec<String>,
    },

    /// The capability itself failed (e.g. mail transport error).
    #[error("{function} failed: {message}")]
    CapabilityFailure { function: String, message: String },
}

impl DispatchError {
    /// Stable identifier reported in the `function_result.error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownFunction(_) => "unknown_function",
            DispatchError::MissingArguments { .. } => "missing_arguments",
            DispatchError::CapabilityFailure { .. } => "capability_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(QaError::Validation("x".into()).code(), "bad_request");
        assert_eq!(QaError::GenerationTimeout(30).code(), "generation_timeout");
        assert_eq!(QaError::EmbeddingTimeout(30).code(), "embedding_timeout");
        assert_eq!(
            QaError::IndexUnavailable("gone".into()).code(),
            "index_unavailable"
        );
    }

    #[test]
    fn test_missing_arguments_message_lists_names() {
        let err = DispatchError::MissingArguments {
            function: "send_email".into(),
            missing: vec!["subject".into(), "body".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing or invalid arguments for send_email: subject, body"
        );
        assert_eq!(err.kind(), "missing_arguments");
    }
}

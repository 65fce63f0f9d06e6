//! Ingestion and question-answering pipelines.
//!
//! [`QaService`] owns every collaborator behind a trait object so the HTTP
//! layer, the CLI and the tests drive the same code:
//!
//! ```text
//! ingest:  file ─► extract ─► chunk ─► embed + store ─► IngestStatus
//! ask:     question ─► embed ─► search(top_k) ─► render prompt
//!                   ─► generate ─► detect/dispatch function ─► QueryResult
//! ```
//!
//! Each upload in a batch is independent; a failing file never affects the
//! others. The query path is strictly sequential and generation is never
//! retried. Every embedding and generation call runs under its own deadline.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::chunk;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{self, DeadlineEmbedder, Embedder};
use crate::error::{QaError, Result};
use crate::extract::{PdfExtractor, TextExtractor};
use crate::functions::{self, FunctionRegistry};
use crate::generation::{self, Generator};
use crate::index::{SqliteIndex, VectorIndex};
use crate::mail::{SendEmail, SmtpMailer};
use crate::models::{Document, IngestStatus, QueryResult};
use crate::prompt;

/// The external capabilities the pipelines depend on.
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn Generator>,
    pub extractor: Arc<dyn TextExtractor>,
    pub functions: Arc<FunctionRegistry>,
}

/// Tunables copied out of [`Config`] at construction.
#[derive(Debug, Clone)]
pub struct QaSettings {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub embedding_timeout: Duration,
    pub generation_timeout: Duration,
    pub function_timeout: Duration,
    pub persona: String,
}

impl QaSettings {
    pub fn from_config(config: &Config, persona: String) -> Self {
        Self {
            chunking: config.chunking.clone(),
            top_k: config.retrieval.top_k,
            embedding_timeout: Duration::from_secs(config.embedding.deadline_secs),
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
            function_timeout: Duration::from_secs(config.mail.timeout_secs),
            persona,
        }
    }
}

pub struct QaService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    extractor: Arc<dyn TextExtractor>,
    functions: Arc<FunctionRegistry>,
    settings: QaSettings,
}

impl QaService {
    pub fn new(collaborators: Collaborators, settings: QaSettings) -> Self {
        Self {
            embedder: Arc::new(DeadlineEmbedder::new(
                collaborators.embedder,
                settings.embedding_timeout,
            )),
            index: collaborators.index,
            generator: collaborators.generator,
            extractor: collaborators.extractor,
            functions: collaborators.functions,
            settings,
        }
    }

    /// Build the production service: configured providers, the SQLite
    /// index, the PDF extractor and the `send_email` capability.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = embedding::create_embedder(&config.embedding)?.into();
        let generator: Arc<dyn Generator> =
            generation::create_generator(&config.generation)?.into();
        let index = SqliteIndex::open(&config.index.path, config.embedding.batch_size)
            .await
            .with_context(|| {
                format!("failed to open vector index at {}", config.index.path.display())
            })?;

        let mail_settings = config.mail.resolve()?;
        let mut functions = FunctionRegistry::new();
        functions.register(Box::new(SendEmail::new(Arc::new(SmtpMailer::new(
            &mail_settings,
        )?))));

        let persona = prompt::load_persona(config.generation.persona_path.as_deref())?;

        tracing::info!(
            embedding_model = embedder.model_name(),
            generation_model = generator.model_name(),
            functions = functions.len(),
            "question-answering service ready"
        );

        Ok(Self::new(
            Collaborators {
                embedder,
                index: Arc::new(index),
                generator,
                extractor: Arc::new(PdfExtractor),
                functions: Arc::new(functions),
            },
            QaSettings::from_config(config, persona),
        ))
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    /// Extract, chunk, embed and store one file. Returns the chunk count.
    ///
    /// `source` is the identifier recorded on every chunk and reported back
    /// as a retrieval source.
    pub async fn ingest_file(&self, path: &Path, source: &str) -> Result<usize> {
        let pages = self.extractor.extract(path).await?;
        tracing::debug!(source, pages = pages.len(), "text extracted");

        let document = Document::new(source, pages);
        let chunks = chunk::chunk_document(&document, &self.settings.chunking)?;
        if chunks.is_empty() {
            return Err(QaError::Extraction {
                file: source.to_string(),
                message: "no extractable text".to_string(),
            });
        }
        tracing::debug!(source, chunks = chunks.len(), "document chunked");

        let stored = self.index.add(&chunks, self.embedder.as_ref()).await?;
        tracing::info!(source, chunks = stored, "document indexed");
        Ok(stored)
    }

    /// Ingest a stored upload and report its status. Never fails.
    pub async fn ingest_upload(&self, filename: &str, path: &Path) -> IngestStatus {
        let source = path.display().to_string();
        match self.ingest_file(path, &source).await {
            Ok(chunks) => IngestStatus::uploaded(filename, chunks),
            Err(e) => {
                tracing::warn!(filename, error = %e, "ingestion failed");
                IngestStatus::failed(filename, e.to_string())
            }
        }
    }

    /// Ingest each `(filename, stored path)` pair independently.
    pub async fn ingest_batch(&self, files: &[(String, PathBuf)]) -> Vec<IngestStatus> {
        let mut statuses = Vec::with_capacity(files.len());
        for (filename, path) in files {
            statuses.push(self.ingest_upload(filename, path).await);
        }
        statuses
    }

    /// Send `query` straight to the generator, without retrieval.
    pub async fn ask_direct(&self, query: &str) -> Result<String> {
        let query = validate_query(query)?;
        self.generate(query).await
    }

    /// Answer `query` from retrieved context, dispatching a function call
    /// if the model asks for one.
    pub async fn ask(&self, query: &str) -> Result<QueryResult> {
        let query = validate_query(query)?;

        let hits = self
            .index
            .search(query, self.settings.top_k, self.embedder.as_ref())
            .await?;
        tracing::debug!(hits = hits.len(), "context retrieved");

        let descriptors = self.functions.descriptors();
        let context = prompt::join_context(&hits);
        let prompt = prompt::render(&self.settings.persona, &descriptors, &context, query);

        let answer = self.generate(&prompt).await?;

        let function_outcome =
            functions::handle(&answer, &self.functions, self.settings.function_timeout).await;
        if let Some(outcome) = &function_outcome {
            tracing::info!(
                function = %outcome.function,
                success = outcome.is_success(),
                "function call handled"
            );
        }

        Ok(QueryResult {
            question: query.to_string(),
            hits,
            prompt,
            answer,
            function_outcome,
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let limit = self.settings.generation_timeout;
        let started = std::time::Instant::now();
        let answer = tokio::time::timeout(limit, self.generator.generate(prompt))
            .await
            .map_err(|_| QaError::GenerationTimeout(limit.as_secs()))??;
        tracing::debug!(
            model = self.generator.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(answer)
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(QaError::Validation("query must not be empty".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SearchHit};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        fn model_name(&self) -> &str {
            "null"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    /// Returns canned hits and remembers what was added.
    #[derive(Default)]
    struct CannedIndex {
        hits: Vec<SearchHit>,
        added: Mutex<usize>,
    }

    #[async_trait]
    impl VectorIndex for CannedIndex {
        async fn add(&self, chunks: &[Chunk], _: &dyn Embedder) -> Result<usize> {
            *self.added.lock().unwrap() += chunks.len();
            Ok(chunks.len())
        }
        async fn search(&self, _: &str, k: usize, _: &dyn Embedder) -> Result<Vec<SearchHit>> {
            Ok(self.hits.iter().take(k).cloned().collect())
        }
        async fn count(&self) -> Result<i64> {
            Ok(*self.added.lock().unwrap() as i64)
        }
    }

    struct Scripted {
        reply: String,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    struct Pages(Vec<String>);

    #[async_trait]
    impl TextExtractor for Pages {
        async fn extract(&self, _: &Path) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        fn model_name(&self) -> &str {
            "stalled"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, _: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(QaError::EmbeddingFailure("unreachable".into()))
        }
    }

    /// Embeds through the index for real, unlike [`CannedIndex`].
    struct EmbeddingIndex;

    #[async_trait]
    impl VectorIndex for EmbeddingIndex {
        async fn add(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<usize> {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            Ok(embedder.embed(&texts).await?.len())
        }
        async fn search(
            &self,
            query: &str,
            _: usize,
            embedder: &dyn Embedder,
        ) -> Result<Vec<SearchHit>> {
            embedding::embed_query(embedder, query).await?;
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<i64> {
            Ok(0)
        }
    }

    fn settings() -> QaSettings {
        QaSettings {
            chunking: ChunkingConfig::default(),
            top_k: 5,
            embedding_timeout: Duration::from_millis(200),
            generation_timeout: Duration::from_millis(200),
            function_timeout: Duration::from_secs(1),
            persona: "You are a test persona.".into(),
        }
    }

    fn service(reply: &str, delay: Duration, pages: Vec<String>) -> (QaService, Arc<Scripted>) {
        let generator = Arc::new(Scripted {
            reply: reply.to_string(),
            delay,
            prompts: Mutex::new(Vec::new()),
        });
        let index = CannedIndex {
            hits: vec![SearchHit {
                content: "Sleep hygiene matters.".into(),
                source: "docs/sleep.pdf".into(),
                page: Some(1),
                score: 0.9,
            }],
            ..Default::default()
        };
        let svc = QaService::new(
            Collaborators {
                embedder: Arc::new(NullEmbedder),
                index: Arc::new(index),
                generator: generator.clone(),
                extractor: Arc::new(Pages(pages)),
                functions: Arc::new(FunctionRegistry::new()),
            },
            settings(),
        );
        (svc, generator)
    }

    #[tokio::test]
    async fn test_blank_query_is_validation_error() {
        let (svc, generator) = service("x", Duration::ZERO, vec![]);
        assert!(matches!(svc.ask("   ").await, Err(QaError::Validation(_))));
        assert!(matches!(svc.ask_direct("").await, Err(QaError::Validation(_))));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ask_renders_context_into_prompt() {
        let (svc, generator) = service("Try a routine.", Duration::ZERO, vec![]);
        let result = svc.ask("How do I sleep better?").await.unwrap();

        assert_eq!(result.answer, "Try a routine.");
        assert!(result.function_outcome.is_none());
        assert_eq!(result.sources(), vec![("docs/sleep.pdf".to_string(), 0.9)]);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("You are a test persona."));
        assert!(prompts[0].contains("Sleep hygiene matters."));
        assert!(prompts[0].contains("Question: How do I sleep better?"));
    }

    #[tokio::test]
    async fn test_slow_generation_times_out() {
        let (svc, _) = service("late", Duration::from_secs(2), vec![]);
        assert!(matches!(
            svc.ask_direct("hello").await,
            Err(QaError::GenerationTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_document_fails_ingestion() {
        let (svc, _) = service("x", Duration::ZERO, vec!["   ".into(), String::new()]);
        let statuses = svc
            .ingest_batch(&[("empty.pdf".to_string(), PathBuf::from("docs/empty.pdf"))])
            .await;
        assert!(!statuses[0].is_success());
        assert_eq!(statuses[0].filename, "empty.pdf");
    }

    #[tokio::test]
    async fn test_ingest_counts_chunks() {
        let (svc, _) = service("x", Duration::ZERO, vec!["a".repeat(2000)]);
        let statuses = svc
            .ingest_batch(&[("long.pdf".to_string(), PathBuf::from("docs/long.pdf"))])
            .await;
        assert!(statuses[0].is_success());
        assert_eq!(statuses[0].chunks, Some(3));
        assert_eq!(svc.index().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stalled_embedding_times_out() {
        let generator = Arc::new(Scripted {
            reply: "unused".into(),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        });
        let svc = QaService::new(
            Collaborators {
                embedder: Arc::new(StalledEmbedder),
                index: Arc::new(EmbeddingIndex),
                generator: generator.clone(),
                extractor: Arc::new(Pages(vec!["Some text.".into()])),
                functions: Arc::new(FunctionRegistry::new()),
            },
            settings(),
        );

        assert!(matches!(
            svc.ask("hello").await,
            Err(QaError::EmbeddingTimeout(_))
        ));
        assert!(generator.prompts.lock().unwrap().is_empty());

        let statuses = svc
            .ingest_batch(&[("slow.pdf".to_string(), PathBuf::from("docs/slow.pdf"))])
            .await;
        assert!(!statuses[0].is_success());
        assert!(statuses[0].error.as_deref().unwrap().contains("timed out"));
    }
}

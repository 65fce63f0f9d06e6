//! Persisted vector index.
//!
//! The [`VectorIndex`] trait is the contract the question-answering pipeline
//! depends on; [`SqliteIndex`] is the implementation, storing chunks and
//! their embeddings in `index.sqlite` under the configured directory.
//!
//! # Behaviour
//!
//! - **Append-only.** Re-adding identical content creates a duplicate
//!   entry. Nothing is ever deleted.
//! - **Re-openable.** A new process opening the same directory serves
//!   searches over everything added before without re-embedding.
//! - **One vector space.** The first write records the embedder's model and
//!   dimensionality; later adds or searches with a different embedder fail
//!   with [`QaError::IndexUnavailable`].
//! - **Brute-force search.** Every stored vector is scored with cosine
//!   similarity in Rust; results are sorted by descending similarity.
//!
//! Concurrency is left to SQLite: WAL mode for concurrent readers and a
//! busy timeout for concurrent writers. Two uploads indexed at once may
//! interleave their rows.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::db;
use crate::embedding::{self, Embedder};
use crate::error::{QaError, Result};
use crate::migrate;
use crate::models::{Chunk, SearchHit};

/// Storage and similarity search over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and store `chunks`. Returns the number of entries written.
    async fn add(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<usize>;

    /// Return at most `k` entries closest to `query`, best first.
    async fn search(&self, query: &str, k: usize, embedder: &dyn Embedder)
        -> Result<Vec<SearchHit>>;

    /// Number of stored entries.
    async fn count(&self) -> Result<i64>;
}

/// SQLite-backed [`VectorIndex`].
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
    batch_size: usize,
}

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

impl SqliteIndex {
    /// Open or create the index stored in `dir`.
    ///
    /// # Errors
    ///
    /// [`QaError::IndexUnavailable`] if the directory cannot be created or
    /// the database file is unreadable or corrupt.
    pub async fn open(dir: &Path, batch_size: usize) -> Result<Self> {
        let pool = db::connect(dir).await?;
        migrate::run_migrations(&pool).await?;
        tracing::debug!(path = %dir.display(), "vector index opened");
        Ok(Self {
            pool,
            batch_size: batch_size.max(1),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Model name and dims recorded by the first write, if any.
    async fn stored_space(&self) -> Result<Option<(String, usize)>> {
        let rows = sqlx::query("SELECT key, value FROM index_meta WHERE key IN (?, ?)")
            .bind(META_MODEL)
            .bind(META_DIMS)
            .fetch_all(&self.pool)
            .await?;

        let mut model = None;
        let mut dims = None;
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_MODEL => model = Some(value),
                META_DIMS => {
                    dims = Some(value.parse::<usize>().map_err(|_| {
                        QaError::IndexUnavailable(format!("corrupt dims metadata: {}", value))
                    })?)
                }
                _ => {}
            }
        }

        Ok(model.zip(dims))
    }

    /// Fail unless `embedder` produces vectors comparable to stored ones.
    fn check_space(stored: &(String, usize), embedder: &dyn Embedder) -> Result<()> {
        let (model, dims) = stored;
        if *dims != embedder.dims() {
            return Err(QaError::IndexUnavailable(format!(
                "embedder produces {}-dimensional vectors but the index holds {}-dimensional vectors",
                embedder.dims(),
                dims
            )));
        }
        if model != embedder.model_name() {
            return Err(QaError::IndexUnavailable(format!(
                "index was built with embedding model '{}', not '{}'",
                model,
                embedder.model_name()
            )));
        }
        Ok(())
    }

    /// Record the embedder's space on first write, or verify it matches.
    async fn claim_space(&self, embedder: &dyn Embedder) -> Result<()> {
        // OR IGNORE: a concurrent first write may have claimed it already.
        sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES (?, ?), (?, ?)")
            .bind(META_MODEL)
            .bind(embedder.model_name())
            .bind(META_DIMS)
            .bind(embedder.dims().to_string())
            .execute(&self.pool)
            .await?;

        match self.stored_space().await? {
            Some(stored) => Self::check_space(&stored, embedder),
            None => Err(QaError::IndexUnavailable(
                "index metadata missing after write".to_string(),
            )),
        }
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn add(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        if let Some(stored) = self.stored_space().await? {
            Self::check_space(&stored, embedder)?;
        }

        // Embed everything before opening the write transaction so the
        // database lock is never held across a network call.
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            vectors.extend(embedder.embed(&texts).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(QaError::EmbeddingFailure(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        // Only a successful embedding run may fix the index's vector space.
        self.claim_space(embedder).await?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            if vector.len() != embedder.dims() {
                return Err(QaError::IndexUnavailable(format!(
                    "vector has {} dimensions, index expects {}",
                    vector.len(),
                    embedder.dims()
                )));
            }

            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO entries (id, source, page, chunk_offset, content, hash, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&chunk.source)
            .bind(chunk.page.map(|p| p as i64))
            .bind(chunk.offset as i64)
            .bind(&chunk.content)
            .bind(content_hash(&chunk.content))
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO vectors (entry_id, dims, embedding) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(vector.len() as i64)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(entries = chunks.len(), "chunks stored in vector index");
        Ok(chunks.len())
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let stored = match self.stored_space().await? {
            Some(stored) => stored,
            // Nothing has ever been added.
            None => return Ok(Vec::new()),
        };
        Self::check_space(&stored, embedder)?;

        let query_vec = embedding::embed_query(embedder, query).await?;
        if query_vec.len() != stored.1 {
            return Err(QaError::IndexUnavailable(format!(
                "query vector has {} dimensions, index holds {}",
                query_vec.len(),
                stored.1
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT e.id, e.source, e.page, e.content, v.embedding
            FROM vectors v
            JOIN entries e ON e.id = v.entry_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(String, SearchHit)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let page: Option<i64> = row.get("page");
                let hit = SearchHit {
                    content: row.get("content"),
                    source: row.get("source"),
                    page: page.map(|p| p as usize),
                    score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                };
                (row.get::<String, _>("id"), hit)
            })
            .collect();

        // Score desc, id asc (deterministic)
        scored.sort_by(|(id_a, a), (id_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(id_a.cmp(id_b))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

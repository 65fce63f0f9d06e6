//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use askpdf::config::ChunkingConfig;
use askpdf::embedding::Embedder;
use askpdf::error::{QaError, Result};
use askpdf::extract::TextExtractor;
use askpdf::functions::FunctionRegistry;
use askpdf::generation::Generator;
use askpdf::index::SqliteIndex;
use askpdf::mail::{MailTransport, SendEmail};
use askpdf::qa::{Collaborators, QaService, QaSettings};
use askpdf::server::{self, AppState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const DIMS: usize = 64;

/// Hashed bag-of-words: texts sharing words get similar vectors.
pub struct HashEmbedder;

fn word_bucket(word: &str) -> usize {
    let mut h: u64 = 1469598103934665603;
    for b in word.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    (h % DIMS as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for word in t
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[word_bucket(word)] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Reads files as UTF-8 text; form feeds separate pages. A file starting
/// with `%CORRUPT` is treated as an unreadable document.
pub struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(path).await.map_err(|e| QaError::Extraction {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;
        if bytes.starts_with(b"%CORRUPT") {
            return Err(QaError::Extraction {
                file: path.display().to_string(),
                message: "unreadable PDF".to_string(),
            });
        }
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.split('\u{c}').map(|p| p.to_string()).collect())
    }
}

/// Replies with a fixed text after an optional delay; records prompts.
pub struct ScriptedGenerator {
    pub reply: String,
    pub delay: Duration,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Records every message; optionally fails every send.
#[derive(Default)]
pub struct RecordingMailer {
    pub fail: bool,
    pub sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("connection refused by smtp.example.com");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub generator: Arc<ScriptedGenerator>,
    pub mailer: Arc<RecordingMailer>,
    pub service: Arc<QaService>,
}

impl Harness {
    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("docs")
    }
}

pub fn settings(generation_timeout: Duration) -> QaSettings {
    QaSettings {
        chunking: ChunkingConfig {
            max_chars: 200,
            overlap_chars: 20,
        },
        top_k: 5,
        embedding_timeout: Duration::from_secs(5),
        generation_timeout,
        function_timeout: Duration::from_secs(2),
        persona: "You are Leo.".to_string(),
    }
}

pub async fn service_at(
    index_dir: &Path,
    generator: Arc<ScriptedGenerator>,
    mailer: Arc<RecordingMailer>,
    generation_timeout: Duration,
) -> QaService {
    let index = SqliteIndex::open(index_dir, 16).await.unwrap();
    let mut functions = FunctionRegistry::new();
    functions.register(Box::new(SendEmail::new(mailer)));

    QaService::new(
        Collaborators {
            embedder: Arc::new(HashEmbedder),
            index: Arc::new(index),
            generator,
            extractor: Arc::new(FakeExtractor),
            functions: Arc::new(functions),
        },
        settings(generation_timeout),
    )
}

pub async fn harness_with(generator: ScriptedGenerator, mailer: RecordingMailer) -> Harness {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(generator);
    let mailer = Arc::new(mailer);
    let service = service_at(
        &tmp.path().join("index"),
        generator.clone(),
        mailer.clone(),
        Duration::from_millis(500),
    )
    .await;
    Harness {
        tmp,
        generator,
        mailer,
        service: Arc::new(service),
    }
}

pub async fn harness(reply: &str) -> Harness {
    harness_with(ScriptedGenerator::new(reply), RecordingMailer::default()).await
}

/// Serve the harness on an ephemeral port and return its base URL.
pub async fn start_server(h: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(h.service.clone(), h.upload_dir(), 64 * 1024);
    tokio::spawn(async move {
        server::serve(listener, state).await.unwrap();
    });

    let base = format!("http://{}", addr);
    wait_for_server(&base).await;
    base
}

async fn wait_for_server(base: &str) {
    let client = reqwest::Client::new();
    let url = format!("{}/health", base);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

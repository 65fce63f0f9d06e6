//! TOML configuration parsing and validation.
//!
//! Configuration is read once at startup by [`load_config`] and passed by
//! reference (or `Arc`) into every component constructor. Mail settings may
//! also come from the environment (or a `.env` file), which take precedence
//! over the `[mail]` table:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `EMAIL_SENDER` | `mail.sender` |
//! | `EMAIL_PASSWORD` | `mail.password` |
//! | `SMTP_SERVER` | `mail.smtp_host` |
//! | `SMTP_PORT` | `mail.smtp_port` |
//!
//! Missing or invalid mail settings fail config loading, so a misconfigured
//! server never starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Location of the persisted vector index.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `index.sqlite`. Created on first use.
    pub path: PathBuf,
}

impl IndexConfig {
    pub fn db_path(&self) -> PathBuf {
        self.path.join("index.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory uploaded files are saved to before extraction.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Uploads larger than this are rejected per file.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("docs")
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters shared by consecutive chunks.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1024
}
fn default_overlap_chars() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on one embedding call, retries and backoff included.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("jina/jina-embeddings-v2-base-es".to_string())
}
fn default_embedding_dims() -> Option<usize> {
    Some(768)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_deadline_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional file whose contents replace the built-in assistant persona.
    #[serde(default)]
    pub persona_path: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            timeout_secs: default_generation_timeout_secs(),
            persona_path: None,
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "llama3.2".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            sender: None,
            password: None,
            smtp_host: None,
            smtp_port: None,
            timeout_secs: default_mail_timeout_secs(),
        }
    }
}

fn default_mail_timeout_secs() -> u64 {
    30
}

/// Fully resolved mail settings. Only produced by [`MailConfig::resolve`].
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub sender: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub timeout_secs: u64,
}

impl MailConfig {
    /// Apply environment overrides on top of the TOML values.
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("EMAIL_SENDER") {
            self.sender = Some(v);
        }
        if let Ok(v) = std::env::var("EMAIL_PASSWORD") {
            self.password = Some(v);
        }
        if let Ok(v) = std::env::var("SMTP_SERVER") {
            self.smtp_host = Some(v);
        }
        if let Ok(v) = std::env::var("SMTP_PORT") {
            let port = v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("SMTP_PORT must be a port number, got '{}'", v))?;
            self.smtp_port = Some(port);
        }
        Ok(())
    }

    /// Check every required field and return the resolved settings.
    pub fn resolve(&self) -> Result<MailSettings> {
        let sender = non_empty(&self.sender, "mail.sender (EMAIL_SENDER)")?;
        if !sender.contains('@') {
            bail!("mail.sender must be an email address, got '{}'", sender);
        }
        let password = non_empty(&self.password, "mail.password (EMAIL_PASSWORD)")?;
        let smtp_host = non_empty(&self.smtp_host, "mail.smtp_host (SMTP_SERVER)")?;
        let smtp_port = match self.smtp_port {
            Some(0) | None => bail!("mail.smtp_port (SMTP_PORT) must be set to a non-zero port"),
            Some(p) => p,
        };
        Ok(MailSettings {
            sender,
            password,
            smtp_host,
            smtp_port,
            timeout_secs: self.timeout_secs,
        })
    }
}

fn non_empty(value: &Option<String>, name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => bail!("{} must be set", name),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Read, merge environment overrides into, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    load_dotenv()?;

    let mut config = parse_config(&content)?;
    config.mail.apply_env()?;
    validate(&config)?;
    Ok(config)
}

/// Load `.env` from the working directory or its parents, if there is one.
fn load_dotenv() -> Result<()> {
    allow_missing_dotenv(dotenvy::dotenv())
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn allow_missing_dotenv<T>(result: dotenvy::Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("Failed to load .env file"),
    }
}

/// Parse a config from a TOML string without environment overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Validate settings that must hold before any component is built.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 || config.embedding.deadline_secs == 0 {
        bail!("embedding.timeout_secs and embedding.deadline_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, openai, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.generation.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    config.mail.resolve()?;
    if config.mail.timeout_secs == 0 {
        bail!("mail.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[index]
path = "/tmp/askpdf-db"

[mail]
sender = "leo@example.com"
password = "secret"
smtp_host = "smtp.example.com"
smtp_port = 587
"#;

    #[test]
    fn test_defaults_applied() {
        let cfg = parse_config(BASE).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.chunking.max_chars, 1024);
        assert_eq!(cfg.chunking.overlap_chars, 80);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.generation.model, "llama3.2");
        assert_eq!(cfg.embedding.provider, "ollama");
        assert_eq!(
            cfg.embedding.model.as_deref(),
            Some("jina/jina-embeddings-v2-base-es")
        );
        assert_eq!(cfg.embedding.dims, Some(768));
        assert_eq!(cfg.embedding.deadline_secs, 120);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.index.db_path(), PathBuf::from("/tmp/askpdf-db/index.sqlite"));
    }

    #[test]
    fn test_missing_mail_fails_fast() {
        let cfg = parse_config("[index]\npath = \"/tmp/x\"\n").unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("mail.sender"), "got: {}", err);
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let content = BASE.replace("leo@example.com", "not-an-address");
        let cfg = parse_config(&content).unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let content = BASE.replace("smtp_port = 587", "smtp_port = 0");
        let cfg = parse_config(&content).unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("smtp_port"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let content = format!("{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n", BASE);
        let cfg = parse_config(&content).unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_dims_and_model() {
        let content = format!("{}\n[embedding]\nprovider = \"openai\"\ndims = 0\n", BASE);
        let cfg = parse_config(&content).unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_zero_embedding_deadline_rejected() {
        let content = format!("{}\n[embedding]\ndeadline_secs = 0\n", BASE);
        let cfg = parse_config(&content).unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("deadline_secs"));
    }

    #[test]
    fn test_missing_dotenv_is_ignored_but_malformed_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let absent = tmp.path().join("absent.env");
        assert!(allow_missing_dotenv(dotenvy::from_path(&absent)).is_ok());

        let malformed = tmp.path().join("malformed.env");
        std::fs::write(&malformed, "not a valid line\n").unwrap();
        let err = allow_missing_dotenv(dotenvy::from_path(&malformed)).unwrap_err();
        assert!(err.to_string().contains(".env"), "got: {}", err);
    }

    #[test]
    fn test_unknown_generation_provider() {
        let content = format!("{}\n[generation]\nprovider = \"carrier-pigeon\"\n", BASE);
        let cfg = parse_config(&content).unwrap();
        assert!(validate(&cfg).is_err());
    }
}

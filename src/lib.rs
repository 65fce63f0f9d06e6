//! # askpdf
//!
//! Upload PDF documents, index their text for semantic retrieval, and answer
//! questions by combining retrieved passages with a generative language
//! model. The model may ask for a side effect (sending an email) through a
//! function-call convention embedded in its reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Upload  │──▶│  Extract   │──▶│ Chunk + Embed │──▶│  SQLite  │
//! │ /pdf    │   │ pdf-extract│   │               │   │  index   │
//! └─────────┘   └────────────┘   └───────────────┘   └────┬─────┘
//!                                                         │ top-k
//! ┌─────────┐   ┌────────────┐   ┌───────────────┐        │
//! │ /askpdf │──▶│   Prompt   │◀──┤   retrieval   │◀───────┘
//! └─────────┘   └─────┬──────┘   └───────────────┘
//!                     ▼
//!               ┌────────────┐   ┌─────────────────┐
//!               │  Generate  │──▶│ detect/dispatch │──▶ send_email
//!               └────────────┘   └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping character chunking |
//! | [`extract`] | PDF / plain-text extraction |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`index`] | Persisted vector index |
//! | [`prompt`] | Prompt template rendering |
//! | [`functions`] | Function-call detection and dispatch |
//! | [`mail`] | SMTP transport and the `send_email` capability |
//! | [`generation`] | Text generation providers |
//! | [`qa`] | Ingestion and question-answering pipelines |
//! | [`server`] | HTTP API |
//! | [`ingest`], [`search`] | CLI commands |
//! | [`db`], [`migrate`] | Database connection and schema |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod functions;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod qa;
pub mod search;
pub mod server;

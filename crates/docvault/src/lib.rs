//! # DocVault
//!
//! Document ingestion, access-scoped hybrid retrieval, and grounded chat
//! context over SQLite.
//!
//! ```text
//!  upload ──▶ storage/<sha256>
//!    │
//!    ▼
//!  Pipeline (one tokio task per document)
//!    scan ─▶ extract ─▶ keyword index ─▶ vector index ─▶ finalize
//!    │                      │                 │
//!    ▼                      ▼                 ▼
//!  documents,          chunks_fts        chunk_vectors
//!  processing_steps    (FTS5)            (embeddings)
//!                           │                 │
//!                           └──── HybridSearcher (scoped) ──▶ allocate ──▶ LLM ──▶ verify
//! ```
//!
//! The algorithms live in `docvault-core`; this crate supplies the SQLite
//! store and indexes, the clamd scanner, the text extractor, embedding and
//! chat providers, and the `dv` CLI.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`db`], [`migrate`] | Pool setup and schema |
//! | [`sqlite_store`] | `DocumentStore` + `PrincipalDirectory` on SQLite |
//! | [`index`] | FTS5 keyword and embedding vector backends |
//! | [`embedding`] | Embedding providers |
//! | [`scanner`] | clamd `INSTREAM` client and scan policy |
//! | [`extract`] | Text extraction for text, PDF, and OOXML |
//! | [`ingest`] | Upload, pipeline state machine, retry, status |
//! | [`progress`] | Progress reporters |
//! | [`llm`] | OpenAI-compatible answer generator |
//! | [`chat`] | Chat turn orchestration |
//! | [`vault`] | Service wiring |

pub mod chat;
pub mod chat_cmd;
pub mod config;
pub mod db;
pub mod doc_cmd;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod scanner;
pub mod search;
pub mod sqlite_store;
pub mod traits;
pub mod user_cmd;
pub mod vault;

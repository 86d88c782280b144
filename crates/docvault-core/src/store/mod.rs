//! Storage and index abstractions.
//!
//! Three seams separate the core logic from persistence and search engines:
//!
//! | Trait | Owns |
//! |-------|------|
//! | [`DocumentStore`] | `Document` rows and the append-only `ProcessingStep` log |
//! | [`PrincipalDirectory`] | Principals and the one-level reporting graph |
//! | [`IndexBackend`] | One search backend (keyword or vector): write-one + query-by-text |
//!
//! Implementations must be `Send + Sync`. The in-memory implementations in
//! [`memory`] back the unit tests; the application crate provides SQLite
//! implementations.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{
    Document, DocumentAccess, DocumentPatch, DocumentStatus, MimeClass, Principal, ProcessingStep,
};

/// Persistence for documents and their processing history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails if the id already exists.
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Compare-and-set status transition.
    ///
    /// Moves the document from `expected` to `next` and applies `patch` in
    /// the same atomic update, but only if the current status still equals
    /// `expected`. Returns `Ok(false)` when the precondition does not hold
    /// (another run got there first), and an error if `expected → next` is
    /// not a legal transition.
    async fn transition(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<bool>;

    async fn append_step(&self, step: &ProcessingStep) -> Result<()>;

    /// All step rows for a document, in insertion order.
    async fn steps(&self, document_id: &str) -> Result<Vec<ProcessingStep>>;

    /// Scoping/ranking projection of every searchable document.
    async fn searchable_documents(&self) -> Result<Vec<DocumentAccess>>;
}

/// Principals and their direct reports.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn upsert_principal(&self, principal: &Principal) -> Result<()>;

    async fn get_principal(&self, id: &str) -> Result<Option<Principal>>;

    /// Ids of principals whose `manager_id` is `manager_id`.
    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>>;
}

/// Content handed to an index backend's writer.
#[derive(Debug, Clone)]
pub struct IndexInput<'a> {
    pub document_id: &'a str,
    pub title: &'a str,
    pub filename: &'a str,
    pub mime_class: MimeClass,
    /// Extracted text. Empty for non-text formats, in which case only the
    /// metadata fields are indexed.
    pub text: &'a str,
}

impl IndexInput<'_> {
    /// Searchable metadata line (title, filename, format).
    pub fn metadata_text(&self) -> String {
        format!("{} {} {}", self.title, self.filename, self.mime_class)
    }
}

/// A raw hit from a backend: the best-matching chunk of one document.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document_id: String,
    /// Backend-native score; higher is better. Normalized by the engine.
    pub raw_score: f64,
    pub snippet: String,
}

/// One search backend.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Short backend name used in logs and error messages (`"keyword"`,
    /// `"vector"`).
    fn name(&self) -> &str;

    /// Whether [`query`](IndexBackend::query) honours the `scope` argument
    /// server-side. When false the engine filters hits after the query.
    fn supports_scope_filter(&self) -> bool {
        false
    }

    /// Index one document; returns an opaque handle stored on the document.
    async fn write(&self, input: &IndexInput<'_>) -> Result<String>;

    /// Query by text for the best hit of up to `limit` distinct documents,
    /// optionally restricted to `scope`. See [`top_documents`].
    async fn query(
        &self,
        text: &str,
        limit: usize,
        scope: Option<&HashSet<String>>,
    ) -> Result<Vec<IndexHit>>;
}

/// Reduce chunk-level hits to each document's best hit, ordered by score
/// then id, and keep the first `limit` documents.
pub fn top_documents(mut hits: Vec<IndexHit>, limit: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    let mut seen = HashSet::new();
    hits.retain(|h| seen.insert(h.document_id.clone()));
    hits.truncate(limit);
    hits
}

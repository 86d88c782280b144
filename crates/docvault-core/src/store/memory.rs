//! In-memory [`DocumentStore`], [`PrincipalDirectory`] and [`IndexBackend`]
//! implementations for tests.
//!
//! State lives in `HashMap`/`Vec` behind `std::sync::RwLock`. The
//! [`MemoryIndex`] does term-count matching over chunks and can be told to
//! fail writes or queries, which is how the partial-failure paths are tested.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::chunk::chunk_text;
use crate::models::{
    Document, DocumentAccess, DocumentPatch, DocumentStatus, Principal, ProcessingStep,
};

use super::{
    top_documents, DocumentStore, IndexBackend, IndexHit, IndexInput, PrincipalDirectory,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// In-memory document store and principal directory.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    steps: RwLock<Vec<ProcessingStep>>,
    principals: RwLock<HashMap<String, Principal>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = write(&self.docs)?;
        if docs.contains_key(&doc.id) {
            bail!("document already exists: {}", doc.id);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(read(&self.docs)?.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<bool> {
        expected.check_transition(next)?;
        let mut docs = write(&self.docs)?;
        let Some(doc) = docs.get_mut(id) else {
            return Ok(false);
        };
        if doc.status != expected {
            return Ok(false);
        }
        doc.status = next;
        patch.apply(doc);
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn append_step(&self, step: &ProcessingStep) -> Result<()> {
        write(&self.steps)?.push(step.clone());
        Ok(())
    }

    async fn steps(&self, document_id: &str) -> Result<Vec<ProcessingStep>> {
        Ok(read(&self.steps)?
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn searchable_documents(&self) -> Result<Vec<DocumentAccess>> {
        let mut out: Vec<DocumentAccess> = read(&self.docs)?
            .values()
            .filter(|d| d.status.is_searchable())
            .map(Document::access)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryStore {
    async fn upsert_principal(&self, principal: &Principal) -> Result<()> {
        write(&self.principals)?.insert(principal.id.clone(), principal.clone());
        Ok(())
    }

    async fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        Ok(read(&self.principals)?.get(id).cloned())
    }

    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = read(&self.principals)?
            .values()
            .filter(|p| p.manager_id.as_deref() == Some(manager_id))
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

struct IndexedChunk {
    document_id: String,
    text: String,
}

/// In-memory search backend with failure injection.
pub struct MemoryIndex {
    name: String,
    scope_filter: bool,
    chunks: RwLock<Vec<IndexedChunk>>,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
    writes: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryIndex {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope_filter: false,
            chunks: RwLock::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Make the backend honour the `scope` argument server-side.
    pub fn with_scope_filter(mut self) -> Self {
        self.scope_filter = true;
        self
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of write calls seen, including failed ones.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of query calls seen, including failed ones.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Insert text directly, bypassing the writer (for retrieval tests).
    pub fn seed(&self, document_id: &str, text: &str) -> Result<()> {
        write(&self.chunks)?.push(IndexedChunk {
            document_id: document_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl IndexBackend for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_scope_filter(&self) -> bool {
        self.scope_filter
    }

    async fn write(&self, input: &IndexInput<'_>) -> Result<String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("{} backend unreachable", self.name);
        }
        let mut chunks = write(&self.chunks)?;
        chunks.retain(|c| c.document_id != input.document_id);
        chunks.push(IndexedChunk {
            document_id: input.document_id.to_string(),
            text: input.metadata_text(),
        });
        for c in chunk_text(input.document_id, input.text, 200) {
            chunks.push(IndexedChunk {
                document_id: input.document_id.to_string(),
                text: c.text,
            });
        }
        Ok(format!("{}:{}", self.name, input.document_id))
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        scope: Option<&HashSet<String>>,
    ) -> Result<Vec<IndexHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            bail!("{} backend unreachable", self.name);
        }
        let query = text.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = read(&self.chunks)?;
        let hits: Vec<IndexHit> = chunks
            .iter()
            .filter(|c| {
                !self.scope_filter || scope.map_or(true, |s| s.contains(&c.document_id))
            })
            .filter_map(|c| {
                let lower = c.text.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(*t)).count();
                (matched > 0).then(|| IndexHit {
                    document_id: c.document_id.clone(),
                    raw_score: matched as f64,
                    snippet: c.text.chars().take(240).collect(),
                })
            })
            .collect();
        Ok(top_documents(hits, limit))
    }
}

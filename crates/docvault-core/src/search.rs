//! Hybrid retrieval over a keyword and a vector backend.
//!
//! The engine operates entirely through the [`DocumentStore`],
//! [`PrincipalDirectory`] and [`IndexBackend`] traits, with no database or
//! configuration dependencies.
//!
//! # Algorithm
//!
//! 1. Resolve the caller's scope. An empty scope returns immediately, with
//!    no backend calls.
//! 2. Query both backends concurrently for `limit × candidate_multiplier`
//!    hits each. Backends that filter by scope server-side get the scope;
//!    all hits are filtered client-side as well.
//! 3. Normalize each backend's raw scores to `[0, 1]` (min-max).
//! 4. Aggregate per document by MAX, then blend:
//!    `score = w_k × keyword + w_v × vector` with weights summing to 1.
//! 5. Sort by score (desc), updated_at (desc), id (asc).
//! 6. Truncate to `limit`.
//!
//! A failing backend is logged and skipped; the query degrades to the
//! surviving backend instead of failing.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{DocumentAccess, Provenance, RetrievedCandidate, Role};
use crate::scope::{self, AccessGraph, ScopeQuery};
use crate::store::{DocumentStore, IndexBackend, IndexHit, PrincipalDirectory};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub keyword_weight: f64,
    pub vector_weight: f64,
    /// Over-fetch factor: each backend is asked for `limit × this` hits.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            keyword_weight: 0.5,
            vector_weight: 0.5,
            candidate_multiplier: 3,
        }
    }
}

impl RetrievalParams {
    /// Weights scaled to sum to 1. Non-positive totals fall back to equal
    /// weighting.
    pub fn normalized_weights(&self) -> (f64, f64) {
        let k = self.keyword_weight.max(0.0);
        let v = self.vector_weight.max(0.0);
        let total = k + v;
        if total <= f64::EPSILON {
            (0.5, 0.5)
        } else {
            (k / total, v / total)
        }
    }
}

/// Inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub principal_id: &'a str,
    pub explicit_selection: Option<&'a [String]>,
    pub limit: usize,
}

/// The caller's resolved scope plus the metadata of every visible document.
#[derive(Debug, Clone, Default)]
pub struct ResolvedScope {
    pub ids: HashSet<String>,
    pub documents: HashMap<String, DocumentAccess>,
}

impl ResolvedScope {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Hybrid search engine.
pub struct HybridSearcher {
    documents: Arc<dyn DocumentStore>,
    principals: Arc<dyn PrincipalDirectory>,
    keyword: Arc<dyn IndexBackend>,
    vector: Arc<dyn IndexBackend>,
    params: RetrievalParams,
}

impl HybridSearcher {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        principals: Arc<dyn PrincipalDirectory>,
        keyword: Arc<dyn IndexBackend>,
        vector: Arc<dyn IndexBackend>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            documents,
            principals,
            keyword,
            vector,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Load the access graph and resolve the principal's scope.
    ///
    /// Unknown principals get the empty scope. Only searchable documents
    /// are considered.
    pub async fn resolve_scope(
        &self,
        principal_id: &str,
        explicit_selection: Option<&[String]>,
    ) -> Result<ResolvedScope> {
        let Some(principal) = self.principals.get_principal(principal_id).await? else {
            debug!(principal_id, "unknown principal, empty scope");
            return Ok(ResolvedScope::default());
        };

        let docs = self.documents.searchable_documents().await?;
        let mut graph = AccessGraph::new(docs);
        if principal.role == Role::Manager {
            let reports = self.principals.direct_reports(&principal.id).await?;
            graph = graph.with_reports(&principal.id, reports);
        }

        let mut query = ScopeQuery::new(&principal);
        if let Some(sel) = explicit_selection {
            query = query.with_selection(sel);
        }
        let ids = scope::resolve(&graph, &query)?;

        let documents = graph
            .documents
            .into_iter()
            .filter(|d| ids.contains(&d.id))
            .map(|d| (d.id.clone(), d))
            .collect();

        Ok(ResolvedScope { ids, documents })
    }

    /// Run a scoped hybrid search.
    ///
    /// Errors only on a malformed selection or a storage fault; backend
    /// failures degrade the result instead.
    pub async fn search(&self, req: &SearchRequest<'_>) -> Result<Vec<RetrievedCandidate>> {
        if req.query.trim().is_empty() || req.limit == 0 {
            return Ok(Vec::new());
        }

        let scope = self
            .resolve_scope(req.principal_id, req.explicit_selection)
            .await?;
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self.search_in_scope(req.query, &scope, req.limit).await)
    }

    /// Search within an already-resolved, non-empty scope.
    pub async fn search_in_scope(
        &self,
        query: &str,
        scope: &ResolvedScope,
        limit: usize,
    ) -> Vec<RetrievedCandidate> {
        if scope.is_empty() || limit == 0 {
            return Vec::new();
        }

        let k = limit.saturating_mul(self.params.candidate_multiplier.max(1));
        let (kw, vec) = futures::join!(
            query_backend(self.keyword.as_ref(), query, k, &scope.ids),
            query_backend(self.vector.as_ref(), query, k, &scope.ids),
        );

        let (w_k, w_v) = self.params.normalized_weights();
        let mut results = blend(&kw, &vec, w_k, w_v, &scope.documents);

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.document_id.cmp(&b.document_id))
        });
        results.truncate(limit);

        debug!(
            keyword_hits = kw.len(),
            vector_hits = vec.len(),
            returned = results.len(),
            "hybrid search complete"
        );
        results
    }
}

/// Query one backend, logging and swallowing failures.
async fn query_backend(
    backend: &dyn IndexBackend,
    query: &str,
    k: usize,
    scope: &HashSet<String>,
) -> Vec<IndexHit> {
    let server_scope = backend.supports_scope_filter().then_some(scope);
    match backend.query(query, k, server_scope).await {
        Ok(mut hits) => {
            // Also drops hits for documents that are no longer searchable.
            hits.retain(|h| scope.contains(&h.document_id));
            hits
        }
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "backend query failed, degrading");
            Vec::new()
        }
    }
}

/// Per-document best normalized score and its snippet.
fn best_per_document(hits: &[IndexHit]) -> HashMap<&str, (f64, &str)> {
    let mut best: HashMap<&str, (f64, &str)> = HashMap::new();
    for (hit, score) in normalize_scores(hits) {
        let entry = best
            .entry(hit.document_id.as_str())
            .or_insert((score, hit.snippet.as_str()));
        if score > entry.0 {
            *entry = (score, hit.snippet.as_str());
        }
    }
    best
}

fn blend(
    keyword: &[IndexHit],
    vector: &[IndexHit],
    w_k: f64,
    w_v: f64,
    documents: &HashMap<String, DocumentAccess>,
) -> Vec<RetrievedCandidate> {
    let kw = best_per_document(keyword);
    let vc = best_per_document(vector);

    let ids: HashSet<&str> = kw.keys().chain(vc.keys()).copied().collect();

    ids.into_iter()
        .filter_map(|id| {
            let meta = documents.get(id)?;
            let k = kw.get(id);
            let v = vc.get(id);
            let k_part = k.map_or(0.0, |(s, _)| w_k * s);
            let v_part = v.map_or(0.0, |(s, _)| w_v * s);
            let provenance = match (k, v) {
                (Some(_), Some(_)) => Provenance::Both,
                (Some(_), None) => Provenance::Keyword,
                _ => Provenance::Vector,
            };
            let snippet = match (k, v) {
                (Some(&(_, ks)), Some(&(_, vs))) => {
                    if v_part > k_part {
                        vs
                    } else {
                        ks
                    }
                }
                (Some(&(_, s)), None) | (None, Some(&(_, s))) => s,
                (None, None) => "",
            };
            Some(RetrievedCandidate {
                document_id: id.to_string(),
                score: (k_part + v_part).clamp(0.0, 1.0),
                snippet: snippet.to_string(),
                provenance,
                title: meta.title.clone(),
                mime_class: meta.mime_class,
                updated_at: meta.updated_at,
            })
        })
        .collect()
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(hits: &[IndexHit]) -> Vec<(&IndexHit, f64)> {
    if hits.is_empty() {
        return Vec::new();
    }

    let s_min = hits
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = hits
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

//! SQLite search backends.
//!
//! - [`SqliteKeywordIndex`]: FTS5 over `chunks_fts`, BM25 ranking.
//! - [`SqliteVectorIndex`]: embeddings in `chunk_vectors`, brute-force
//!   cosine similarity.
//!
//! Both push the scope into SQL via `json_each` and return the best chunk
//! per document, so `limit` counts documents.
//!
//! Each writer replaces every row it owns for a document in one
//! `BEGIN IMMEDIATE` transaction, so re-indexing after a retry never
//! duplicates hits. Taking the write lock up front matters under WAL: a
//! deferred transaction that reads before writing fails with
//! `SQLITE_BUSY_SNAPSHOT` when another run commits first, and the busy
//! timeout does not retry that. Both also index a metadata row (title,
//! filename, format) at chunk index `-1`, which is all an image or binary
//! upload contributes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

use docvault_core::chunk::chunk_text;
use docvault_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use docvault_core::models::TextChunk;
use docvault_core::store::{top_documents, IndexBackend, IndexHit, IndexInput};

const METADATA_CHUNK_INDEX: i64 = -1;

/// Metadata row followed by the text chunks.
fn index_units(input: &IndexInput<'_>, max_tokens: usize) -> Vec<TextChunk> {
    let meta = input.metadata_text();
    let mut units = vec![TextChunk {
        id: format!("{}:meta", input.document_id),
        document_id: input.document_id.to_string(),
        chunk_index: METADATA_CHUNK_INDEX,
        hash: docvault_core::chunk::content_hash(&meta),
        text: meta,
    }];
    units.extend(chunk_text(input.document_id, input.text, max_tokens));
    units
}

/// Turn free text into an FTS5 expression: every term quoted, OR-joined.
///
/// Quoting neutralizes FTS operators (`AND`, `NEAR`, `*`, `:`) in user input.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Scope as a JSON array for `json_each`; `None` means unrestricted.
fn scope_json(scope: Option<&HashSet<String>>) -> Result<Option<String>> {
    scope
        .map(|ids| serde_json::to_string(&ids.iter().collect::<Vec<_>>()))
        .transpose()
        .map_err(Into::into)
}

const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

// ═══════════════════════════════════════════════════════════════════════
// Keyword
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteKeywordIndex {
    pool: SqlitePool,
    chunk_max_tokens: usize,
}

impl SqliteKeywordIndex {
    pub fn new(pool: SqlitePool, chunk_max_tokens: usize) -> Self {
        Self {
            pool,
            chunk_max_tokens,
        }
    }
}

#[async_trait]
impl IndexBackend for SqliteKeywordIndex {
    fn name(&self) -> &str {
        "keyword"
    }

    fn supports_scope_filter(&self) -> bool {
        true
    }

    async fn write(&self, input: &IndexInput<'_>) -> Result<String> {
        let units = index_units(input, self.chunk_max_tokens);
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(input.document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(input.document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &units {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("keyword index commit failed for {}", input.document_id))?;
        Ok(format!("fts:{}:{}", input.document_id, units.len()))
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        scope: Option<&HashSet<String>>,
    ) -> Result<Vec<IndexHit>> {
        let Some(expr) = fts_query(text) else {
            return Ok(Vec::new());
        };

        let scope = scope_json(scope)?;
        let rows = sqlx::query(
            r#"
            WITH ranked AS (
                SELECT chunks_fts.document_id AS document_id,
                       chunks_fts.rank AS rank,
                       c.text AS snippet,
                       ROW_NUMBER() OVER (
                           PARTITION BY chunks_fts.document_id
                           ORDER BY chunks_fts.rank
                       ) AS rn
                FROM chunks_fts
                JOIN chunks c ON c.id = chunks_fts.chunk_id
                WHERE chunks_fts MATCH ?
                  AND (? IS NULL OR chunks_fts.document_id IN (SELECT value FROM json_each(?)))
            )
            SELECT document_id, rank, snippet
            FROM ranked
            WHERE rn = 1
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(&scope)
        .bind(&scope)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                IndexHit {
                    document_id: row.get("document_id"),
                    // FTS5 rank is negated BM25: lower is better.
                    raw_score: -rank,
                    snippet: row.get("snippet"),
                }
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Vector
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    chunk_max_tokens: usize,
}

impl SqliteVectorIndex {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        chunk_max_tokens: usize,
    ) -> Self {
        Self {
            pool,
            provider,
            chunk_max_tokens,
        }
    }
}

#[async_trait]
impl IndexBackend for SqliteVectorIndex {
    fn name(&self) -> &str {
        "vector"
    }

    fn supports_scope_filter(&self) -> bool {
        true
    }

    async fn write(&self, input: &IndexInput<'_>) -> Result<String> {
        let units = index_units(input, self.chunk_max_tokens);
        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let vectors = self.provider.embed(&texts).await?;
        if vectors.len() != units.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                units.len()
            );
        }

        let model = self.provider.model_name().to_string();
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(input.document_id)
            .execute(&mut *tx)
            .await?;

        for (unit, vector) in units.iter().zip(&vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, chunk_index, text, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&unit.id)
            .bind(&unit.document_id)
            .bind(unit.chunk_index)
            .bind(&unit.text)
            .bind(&model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("vector index commit failed for {}", input.document_id))?;
        Ok(format!("vec:{}:{}", input.document_id, units.len()))
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        scope: Option<&HashSet<String>>,
    ) -> Result<Vec<IndexHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .provider
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("empty embedding response")?;

        let scope = scope_json(scope)?;
        let rows = sqlx::query(
            r#"
            SELECT document_id, text, embedding
            FROM chunk_vectors
            WHERE model = ?
              AND (? IS NULL OR document_id IN (SELECT value FROM json_each(?)))
            "#,
        )
        .bind(self.provider.model_name())
        .bind(&scope)
        .bind(&scope)
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexHit {
                    document_id: row.get("document_id"),
                    raw_score: cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64,
                    snippet: row.get("text"),
                }
            })
            .filter(|h| h.raw_score > 0.0)
            .collect();
        Ok(top_documents(hits, limit))
    }
}

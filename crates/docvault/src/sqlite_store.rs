//! SQLite-backed [`DocumentStore`] and [`PrincipalDirectory`].
//!
//! Status transitions are a single compare-and-set statement
//! (`UPDATE … WHERE id = ? AND status = ?`), so two runs racing on the same
//! document cannot both advance it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docvault_core::models::{
    Document, DocumentAccess, DocumentPatch, DocumentStatus, Principal, ProcessingStep,
};
use docvault_core::store::{DocumentStore, PrincipalDirectory};

const DOCUMENT_COLUMNS: &str = "id, external_id, filename, title, owner_id, classification, \
     mime_class, size_bytes, file_hash, storage_path, status, virus_scan_status, \
     keyword_index_ref, vector_index_ref, error_message, created_at, updated_at";

/// SQLite implementation of the document and principal traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look a document up by internal id or, failing that, external id.
    pub async fn find_document(&self, id_or_external: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ? OR external_id = ? LIMIT 1",
            DOCUMENT_COLUMNS
        ))
        .bind(id_or_external)
        .bind(id_or_external)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Documents sharing a file hash, for duplicate-upload reporting.
    pub async fn documents_with_hash(&self, file_hash: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents WHERE file_hash = ? ORDER BY id")
            .bind(file_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let parse_ctx = || format!("corrupt document row {}", id);
    let size: i64 = row.get("size_bytes");
    Ok(Document {
        external_id: row.get("external_id"),
        filename: row.get("filename"),
        title: row.get("title"),
        owner_id: row.get("owner_id"),
        classification: row
            .get::<String, _>("classification")
            .parse()
            .with_context(parse_ctx)?,
        mime_class: row
            .get::<String, _>("mime_class")
            .parse()
            .with_context(parse_ctx)?,
        size_bytes: size.max(0) as u64,
        file_hash: row.get("file_hash"),
        storage_path: row.get("storage_path"),
        status: row.get::<String, _>("status").parse().with_context(parse_ctx)?,
        virus_scan_status: row
            .get::<String, _>("virus_scan_status")
            .parse()
            .with_context(parse_ctx)?,
        keyword_index_ref: row.get("keyword_index_ref"),
        vector_index_ref: row.get("vector_index_ref"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        id,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ProcessingStep> {
    let progress: i64 = row.get("progress");
    Ok(ProcessingStep {
        document_id: row.get("document_id"),
        run_id: row.get("run_id"),
        step: row.get::<String, _>("step").parse()?,
        status: row.get::<String, _>("status").parse()?,
        progress: progress.clamp(0, 100) as u8,
        message: row.get("message"),
        error_message: row.get("error_message"),
        timestamp: row.get("timestamp"),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO documents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            DOCUMENT_COLUMNS
        ))
        .bind(&doc.id)
        .bind(&doc.external_id)
        .bind(&doc.filename)
        .bind(&doc.title)
        .bind(&doc.owner_id)
        .bind(doc.classification.as_str())
        .bind(doc.mime_class.as_str())
        .bind(doc.size_bytes as i64)
        .bind(&doc.file_hash)
        .bind(&doc.storage_path)
        .bind(doc.status.as_str())
        .bind(doc.virus_scan_status.as_str())
        .bind(&doc.keyword_index_ref)
        .bind(&doc.vector_index_ref)
        .bind(&doc.error_message)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert document {}", doc.id))?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn transition(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<bool> {
        expected.check_transition(next)?;

        let mut sql = String::from("UPDATE documents SET status = ?, updated_at = ?");
        if patch.virus_scan_status.is_some() {
            sql.push_str(", virus_scan_status = ?");
        }
        if patch.keyword_index_ref.is_some() {
            sql.push_str(", keyword_index_ref = ?");
        }
        if patch.vector_index_ref.is_some() {
            sql.push_str(", vector_index_ref = ?");
        }
        if patch.error_message.is_some() {
            sql.push_str(", error_message = ?");
        }
        sql.push_str(" WHERE id = ? AND status = ?");

        let mut query = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(chrono::Utc::now().timestamp());
        if let Some(s) = patch.virus_scan_status {
            query = query.bind(s.as_str());
        }
        if let Some(r) = &patch.keyword_index_ref {
            query = query.bind(r.clone());
        }
        if let Some(r) = &patch.vector_index_ref {
            query = query.bind(r.clone());
        }
        if let Some(e) = &patch.error_message {
            query = query.bind(e.clone());
        }

        let result = query
            .bind(id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_step(&self, step: &ProcessingStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_steps
                (document_id, run_id, step, status, progress, message, error_message, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&step.document_id)
        .bind(&step.run_id)
        .bind(step.step.as_str())
        .bind(step.status.as_str())
        .bind(step.progress as i64)
        .bind(&step.message)
        .bind(&step.error_message)
        .bind(step.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn steps(&self, document_id: &str) -> Result<Vec<ProcessingStep>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, run_id, step, status, progress, message, error_message, timestamp
            FROM processing_steps
            WHERE document_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(step_from_row).collect()
    }

    async fn searchable_documents(&self) -> Result<Vec<DocumentAccess>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE status IN ('indexed', 'stored', 'partially_indexed') \
             ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| document_from_row(r).map(|d| d.access()))
            .collect()
    }
}

#[async_trait]
impl PrincipalDirectory for SqliteStore {
    async fn upsert_principal(&self, principal: &Principal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO principals (id, role, manager_id) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                role = excluded.role,
                manager_id = excluded.manager_id
            "#,
        )
        .bind(&principal.id)
        .bind(principal.role.as_str())
        .bind(&principal.manager_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        let row = sqlx::query("SELECT id, role, manager_id FROM principals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(Principal {
                id: r.get("id"),
                role: r.get::<String, _>("role").parse()?,
                manager_id: r.get("manager_id"),
            })
        })
        .transpose()
    }

    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM principals WHERE manager_id = ? ORDER BY id")
            .bind(manager_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use docvault_core::models::{Classification, MimeClass, Role, StepName, StepStatus, VirusScanStatus};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn doc(id: &str, owner: &str) -> Document {
        Document {
            id: id.to_string(),
            external_id: format!("ext-{}", id),
            filename: "report.pdf".into(),
            title: Some("Report".into()),
            owner_id: owner.into(),
            classification: Classification::Restricted,
            mime_class: MimeClass::Pdf,
            size_bytes: 2048,
            file_hash: "abc".into(),
            storage_path: "/tmp/abc".into(),
            status: DocumentStatus::Uploaded,
            virus_scan_status: VirusScanStatus::Pending,
            keyword_index_ref: None,
            vector_index_ref: None,
            error_message: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn document_roundtrip_and_lookup_by_external_id() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.classification, Classification::Restricted);
        assert_eq!(loaded.mime_class, MimeClass::Pdf);
        assert_eq!(loaded.title.as_deref(), Some("Report"));

        let by_ext = store.find_document("ext-d1").await.unwrap().unwrap();
        assert_eq!(by_ext.id, "d1");
        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();

        let patch = DocumentPatch {
            virus_scan_status: Some(VirusScanStatus::Clean),
            ..Default::default()
        };
        assert!(store
            .transition("d1", DocumentStatus::Uploaded, DocumentStatus::Scanning, &patch)
            .await
            .unwrap());
        // Second claim loses the race.
        assert!(!store
            .transition("d1", DocumentStatus::Uploaded, DocumentStatus::Scanning, &patch)
            .await
            .unwrap());

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Scanning);
        assert_eq!(loaded.virus_scan_status, VirusScanStatus::Clean);
    }

    #[tokio::test]
    async fn transition_patch_can_clear_fields() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();
        let fail = DocumentPatch {
            error_message: Some(Some("boom".into())),
            ..Default::default()
        };
        store
            .transition("d1", DocumentStatus::Uploaded, DocumentStatus::Failed, &fail)
            .await
            .unwrap();
        assert_eq!(
            store.get_document("d1").await.unwrap().unwrap().error_message.as_deref(),
            Some("boom")
        );

        let retry = DocumentPatch {
            error_message: Some(None),
            ..Default::default()
        };
        store
            .transition("d1", DocumentStatus::Failed, DocumentStatus::Uploaded, &retry)
            .await
            .unwrap();
        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Uploaded);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn illegal_transition_is_an_error() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();
        let err = store
            .transition(
                "d1",
                DocumentStatus::Uploaded,
                DocumentStatus::Indexed,
                &DocumentPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid status transition"));
    }

    #[tokio::test]
    async fn steps_keep_insertion_order() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();
        for (step, status) in [
            (StepName::Scan, StepStatus::Running),
            (StepName::Scan, StepStatus::Completed),
            (StepName::Extract, StepStatus::Running),
        ] {
            store
                .append_step(&ProcessingStep {
                    document_id: "d1".into(),
                    run_id: "r1".into(),
                    step,
                    status,
                    progress: step.progress(),
                    message: String::new(),
                    error_message: None,
                    timestamp: 0,
                })
                .await
                .unwrap();
        }
        let steps = store.steps("d1").await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].status, StepStatus::Completed);
        assert_eq!(steps[2].step, StepName::Extract);
        assert_eq!(steps[2].progress, 30);
    }

    #[tokio::test]
    async fn principals_and_reports() {
        let (_dir, store) = store().await;
        for (id, role, mgr) in [
            ("boss", Role::Manager, None),
            ("ann", Role::Analyst, Some("boss")),
            ("bob", Role::Analyst, Some("ann")),
        ] {
            store
                .upsert_principal(&Principal {
                    id: id.into(),
                    role,
                    manager_id: mgr.map(String::from),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.direct_reports("boss").await.unwrap(), vec!["ann"]);
        let boss = store.get_principal("boss").await.unwrap().unwrap();
        assert_eq!(boss.role, Role::Manager);
        assert!(store.get_principal("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_settled_documents_are_searchable() {
        let (_dir, store) = store().await;
        store.insert_document(&doc("d1", "alice")).await.unwrap();
        let mut indexed = doc("d2", "alice");
        indexed.status = DocumentStatus::Indexed;
        store.insert_document(&indexed).await.unwrap();

        let docs = store.searchable_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d2");
        assert_eq!(docs[0].title, "Report");
    }
}

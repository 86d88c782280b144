//! Ingestion pipeline: upload, the per-document state machine, retry, and
//! status.
//!
//! ```text
//! Uploaded ─▶ Scanning ─▶ TextExtracting ─▶ KeywordIndexing ─┬─▶ VectorIndexing ─┬─▶ Indexed
//!                                                            │                   └─▶ PartiallyIndexed
//!                                                            └─▶ Stored (no text)
//!        any non-terminal state ─▶ Failed ─(retry)─▶ Uploaded
//! ```
//!
//! Every status change is a compare-and-set on the document row, so a run
//! that loses the initial `Uploaded → Scanning` claim does nothing. Every
//! step writes a [`ProcessingStep`] row and emits a [`ProgressEvent`] before
//! the next step starts.
//!
//! Each step runs under a [`TimeBudget`]: crossing `soft` records a
//! `warning` row, crossing `hard` fails the run. A timed-out step's future
//! is dropped, which cancels in-flight I/O on a best-effort basis; a
//! backend that already committed its write keeps it until the next run
//! overwrites it.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docvault_core::models::{
    latest_steps, Classification, Document, DocumentPatch, DocumentStatus, DocumentView,
    MimeClass, ProcessingStep, StepName, StepStatus, VirusScanStatus,
};
use docvault_core::store::{DocumentStore, IndexBackend, IndexInput};
use docvault_core::timeouts::{TimeBudget, TimeoutConfig};
use docvault_core::VaultError;

use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scanner::ScanPolicy;
use crate::traits::{ScanVerdict, Scanner, TextExtractor};

/// Collaborators a pipeline run calls out to.
#[derive(Clone)]
pub struct Services {
    pub documents: Arc<dyn DocumentStore>,
    pub scanner: Arc<dyn Scanner>,
    pub extractor: Arc<dyn TextExtractor>,
    pub keyword: Arc<dyn IndexBackend>,
    pub vector: Arc<dyn IndexBackend>,
    pub progress: Arc<dyn ProgressReporter>,
}

/// Result of one pipeline attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run owned the document and left it in `status`.
    Finished {
        run_id: String,
        status: DocumentStatus,
        error: Option<String>,
    },
    /// Another run owns the document, or it is not in `Uploaded`.
    NotClaimed { current: DocumentStatus },
}

impl RunOutcome {
    pub fn status(&self) -> DocumentStatus {
        match self {
            RunOutcome::Finished { status, .. } => *status,
            RunOutcome::NotClaimed { current } => *current,
        }
    }
}

/// Per-run state.
struct RunCtx {
    doc: Document,
    run_id: String,
    policy: ScanPolicy,
}

/// The ingestion state machine.
///
/// Cheap to clone; clones share services and the scan policy.
#[derive(Clone)]
pub struct Pipeline {
    services: Services,
    timeouts: TimeoutConfig,
    scan_policy: Arc<RwLock<ScanPolicy>>,
}

impl Pipeline {
    pub fn new(services: Services, timeouts: TimeoutConfig, scan_policy: ScanPolicy) -> Self {
        Self {
            services,
            timeouts,
            scan_policy: Arc::new(RwLock::new(scan_policy)),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn scan_policy(&self) -> ScanPolicy {
        *self
            .scan_policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change the policy for runs that start after this call. Runs already
    /// in flight keep the policy they started with.
    pub fn set_scan_policy(&self, policy: ScanPolicy) {
        *self
            .scan_policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = policy;
    }

    /// Run one attempt inline.
    pub async fn run(&self, document_id: &str) -> Result<RunOutcome> {
        self.run_as(document_id, &Uuid::new_v4().to_string()).await
    }

    /// Run as a background task.
    pub fn spawn(&self, document_id: &str) -> JoinHandle<Result<RunOutcome>> {
        self.spawn_as(document_id, Uuid::new_v4().to_string())
    }

    fn spawn_as(&self, document_id: &str, run_id: String) -> JoinHandle<Result<RunOutcome>> {
        let pipeline = self.clone();
        let document_id = document_id.to_string();
        tokio::spawn(async move { pipeline.run_as(&document_id, &run_id).await })
    }

    /// Move a `Failed` document back to `Uploaded` and return the id the
    /// next run should use. Errors with `InvalidTransition` from any other
    /// state.
    pub async fn reset_for_retry(&self, document_id: &str) -> Result<String> {
        let doc = self
            .services
            .documents
            .get_document(document_id)
            .await?
            .with_context(|| format!("document not found: {}", document_id))?;

        if doc.status != DocumentStatus::Failed {
            return Err(VaultError::InvalidTransition {
                from: doc.status,
                to: DocumentStatus::Uploaded,
            }
            .into());
        }

        let patch = DocumentPatch {
            virus_scan_status: Some(VirusScanStatus::Pending),
            keyword_index_ref: Some(None),
            vector_index_ref: Some(None),
            error_message: Some(None),
        };
        let claimed = self
            .services
            .documents
            .transition(document_id, DocumentStatus::Failed, DocumentStatus::Uploaded, &patch)
            .await?;
        if !claimed {
            bail!("document {} changed state during retry", document_id);
        }

        let run_id = Uuid::new_v4().to_string();
        info!(document_id, run_id = %run_id, "document reset for retry");
        Ok(run_id)
    }

    /// Reset a `Failed` document and start a fresh background run.
    /// Returns the new run's id.
    pub async fn retry(&self, document_id: &str) -> Result<String> {
        let run_id = self.reset_for_retry(document_id).await?;
        self.spawn_as(document_id, run_id.clone());
        Ok(run_id)
    }

    /// Run one attempt with a caller-chosen run id.
    pub async fn run_as(&self, document_id: &str, run_id: &str) -> Result<RunOutcome> {
        let doc = self
            .services
            .documents
            .get_document(document_id)
            .await?
            .with_context(|| format!("document not found: {}", document_id))?;

        let claimed = self
            .services
            .documents
            .transition(
                document_id,
                DocumentStatus::Uploaded,
                DocumentStatus::Scanning,
                &DocumentPatch::default(),
            )
            .await?;
        if !claimed {
            let current = self
                .services
                .documents
                .get_document(document_id)
                .await?
                .map_or(doc.status, |d| d.status);
            debug!(document_id, status = %current, "run not claimed");
            return Ok(RunOutcome::NotClaimed { current });
        }

        let ctx = RunCtx {
            doc,
            run_id: run_id.to_string(),
            policy: self.scan_policy(),
        };
        info!(
            document_id,
            run_id,
            mime = %ctx.doc.mime_class,
            size_bytes = ctx.doc.size_bytes,
            policy = ?ctx.policy,
            "pipeline run started"
        );

        match self.drive(&ctx).await {
            Ok(outcome) => {
                info!(document_id, run_id, status = %outcome.status(), "pipeline run finished");
                Ok(outcome)
            }
            Err(e) => {
                // Storage fault mid-run: make a best effort not to leave the
                // document stuck in an intermediate state.
                warn!(document_id, run_id, error = %e, "pipeline run aborted");
                if let Ok(Some(current)) = self.services.documents.get_document(document_id).await {
                    if !current.status.is_terminal() {
                        let marked = self
                            .services
                            .documents
                            .transition(
                                document_id,
                                current.status,
                                DocumentStatus::Failed,
                                &error_patch(format!("internal error: {:#}", e)),
                            )
                            .await;
                        if let Err(mark_err) = marked {
                            warn!(
                                document_id,
                                run_id,
                                error = %mark_err,
                                "could not mark aborted run as failed"
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, ctx: &RunCtx) -> Result<RunOutcome> {
        let path = PathBuf::from(&ctx.doc.storage_path);

        // ── scan ─────────────────────────────────────────────────────────
        let step = StepName::Scan;
        let scanner = self.services.scanner.clone();
        let message = format!("scanning with {}", scanner.name());
        self.record(ctx, step, StepStatus::Running, message, None)
            .await?;
        let verdict = match self.timed(ctx, step, scanner.scan(&path)).await? {
            Ok(v) => v,
            Err(timeout) => return self.fail(ctx, step, timeout, None).await,
        };

        let scan_status = match verdict {
            ScanVerdict::Clean => VirusScanStatus::Clean,
            ScanVerdict::Skipped => VirusScanStatus::Skipped,
            ScanVerdict::Infected(signature) => {
                warn!(document_id = %ctx.doc.id, signature = %signature, "infected upload");
                let err = VaultError::SecurityViolation(signature);
                return self
                    .fail(ctx, step, err, Some(VirusScanStatus::Infected))
                    .await;
            }
            ScanVerdict::Error(reason) => match ctx.policy {
                ScanPolicy::FailClosed => {
                    let err = VaultError::ScanUnavailable(reason);
                    return self.fail(ctx, step, err, Some(VirusScanStatus::Error)).await;
                }
                ScanPolicy::FailOpen => {
                    warn!(
                        document_id = %ctx.doc.id,
                        reason = %reason,
                        "scan failed, continuing (fail-open)"
                    );
                    let message = "scan unavailable, treated as clean";
                    self.record(ctx, step, StepStatus::Warning, message, Some(reason))
                        .await?;
                    VirusScanStatus::Error
                }
            },
        };
        let message = format!("scan {}", scan_status.as_str());
        self.record(ctx, step, StepStatus::Completed, message, None)
            .await?;
        let patch = DocumentPatch {
            virus_scan_status: Some(scan_status),
            ..Default::default()
        };
        if !self.advance(ctx, step, DocumentStatus::TextExtracting, &patch).await? {
            return self.lost(ctx).await;
        }

        // ── extract ──────────────────────────────────────────────────────
        let step = StepName::Extract;
        let mime = ctx.doc.mime_class;
        let text = if mime.is_text_bearing() {
            let message = format!("extracting {}", mime);
            self.record(ctx, step, StepStatus::Running, message, None)
                .await?;
            let extractor = self.services.extractor.clone();
            let extraction = async {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                extractor.extract(bytes, mime).await
            };
            let text = match self.timed(ctx, step, extraction).await? {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    let err = VaultError::UnsupportedFormat(format!("{}: {:#}", mime, e));
                    return self.fail(ctx, step, err, None).await;
                }
                Err(timeout) => return self.fail(ctx, step, timeout, None).await,
            };
            let text = if text.trim().is_empty() { String::new() } else { text };
            let message = format!("{} characters extracted", text.chars().count());
            self.record(ctx, step, StepStatus::Completed, message, None)
                .await?;
            text
        } else {
            let message = format!("no extractable text in {}", mime);
            self.record(ctx, step, StepStatus::Skipped, message, None)
                .await?;
            String::new()
        };
        let next = DocumentStatus::KeywordIndexing;
        if !self.advance(ctx, step, next, &DocumentPatch::default()).await? {
            return self.lost(ctx).await;
        }

        let input = IndexInput {
            document_id: &ctx.doc.id,
            title: ctx.doc.display_title(),
            filename: &ctx.doc.filename,
            mime_class: mime,
            text: &text,
        };

        // ── keyword index ────────────────────────────────────────────────
        let step = StepName::KeywordIndex;
        let keyword = self.services.keyword.clone();
        let keyword_result = match self.write_index(ctx, step, keyword.as_ref(), &input).await? {
            IndexWrite::Done(r) => r,
            IndexWrite::TimedOut(timeout) => return self.fail(ctx, step, timeout, None).await,
        };

        // Empty text: keyword-only, vector writer never invoked.
        if text.is_empty() {
            return match keyword_result {
                Ok(keyword_ref) => {
                    let message = "no text to embed";
                    self.record(ctx, StepName::VectorIndex, StepStatus::Skipped, message, None)
                        .await?;
                    let patch = DocumentPatch {
                        keyword_index_ref: Some(Some(keyword_ref)),
                        vector_index_ref: Some(None),
                        ..Default::default()
                    };
                    self.finish(ctx, step, DocumentStatus::Stored, patch, None).await
                }
                // write_index already recorded the failed keyword row.
                Err(e) => self.mark_failed(ctx, status_during(step), e, None).await,
            };
        }

        let patch = DocumentPatch {
            keyword_index_ref: Some(keyword_result.as_ref().ok().cloned()),
            ..Default::default()
        };
        if !self.advance(ctx, step, DocumentStatus::VectorIndexing, &patch).await? {
            return self.lost(ctx).await;
        }

        // ── vector index ─────────────────────────────────────────────────
        let step = StepName::VectorIndex;
        let vector = self.services.vector.clone();
        let vector_result = match self.write_index(ctx, step, vector.as_ref(), &input).await? {
            IndexWrite::Done(r) => r,
            IndexWrite::TimedOut(timeout) => return self.fail(ctx, step, timeout, None).await,
        };

        // ── resolve ──────────────────────────────────────────────────────
        let (status, vector_ref, error) = match (keyword_result, vector_result) {
            (Ok(_), Ok(vector_ref)) => (DocumentStatus::Indexed, Some(vector_ref), None),
            (Ok(_), Err(e)) => (DocumentStatus::PartiallyIndexed, None, Some(e)),
            (Err(e), Ok(vector_ref)) => {
                (DocumentStatus::PartiallyIndexed, Some(vector_ref), Some(e))
            }
            (Err(k), Err(v)) => {
                let err = VaultError::BackendUnavailable {
                    backend: format!("{} and {}", keyword.name(), vector.name()),
                    reason: format!("{}; {}", k, v),
                };
                return self.fail(ctx, step, err, None).await;
            }
        };
        let error = error.map(|e| e.to_string());
        let patch = DocumentPatch {
            vector_index_ref: Some(vector_ref),
            error_message: error.clone().map(Some),
            ..Default::default()
        };
        self.finish(ctx, step, status, patch, error).await
    }

    /// One index write with its running/completed/failed rows. A backend
    /// error is a result, a hard timeout is not.
    async fn write_index(
        &self,
        ctx: &RunCtx,
        step: StepName,
        backend: &dyn IndexBackend,
        input: &IndexInput<'_>,
    ) -> Result<IndexWrite> {
        let message = format!("writing {} index", backend.name());
        self.record(ctx, step, StepStatus::Running, message, None)
            .await?;
        let result = match self.timed(ctx, step, backend.write(input)).await? {
            Ok(r) => r.map_err(|e| VaultError::backend(backend.name(), format!("{:#}", e))),
            Err(timeout) => return Ok(IndexWrite::TimedOut(timeout)),
        };
        match &result {
            Ok(r) => {
                let message = format!("{} ref {}", backend.name(), r);
                self.record(ctx, step, StepStatus::Completed, message, None)
                    .await?;
            }
            Err(e) => {
                warn!(
                    document_id = %ctx.doc.id,
                    backend = backend.name(),
                    error = %e,
                    "index write failed"
                );
                let message = format!("{} index write failed", backend.name());
                self.record(ctx, step, StepStatus::Failed, message, Some(e.to_string()))
                    .await?;
            }
        }
        Ok(IndexWrite::Done(result))
    }

    /// Await `fut` under the step's budget. The outer `Result` carries
    /// storage errors from recording the soft-budget warning; the inner one
    /// carries a hard timeout.
    async fn timed<T>(
        &self,
        ctx: &RunCtx,
        step: StepName,
        fut: impl Future<Output = T>,
    ) -> Result<Result<T, VaultError>> {
        let TimeBudget { soft, hard } =
            self.timeouts
                .budget(step, ctx.doc.size_bytes, ctx.doc.mime_class);
        tokio::pin!(fut);

        tokio::select! {
            out = &mut fut => return Ok(Ok(out)),
            _ = tokio::time::sleep(soft) => {}
        }

        warn!(
            document_id = %ctx.doc.id,
            step = %step,
            soft_secs = soft.as_secs_f64(),
            "step exceeded soft time budget"
        );
        self.record(
            ctx,
            step,
            StepStatus::Warning,
            format!("exceeded soft budget of {:.1}s", soft.as_secs_f64()),
            None,
        )
        .await?;

        match tokio::time::timeout(hard.saturating_sub(soft), fut).await {
            Ok(out) => Ok(Ok(out)),
            Err(_) => Ok(Err(VaultError::TimeoutExceeded {
                step,
                secs: hard.as_secs_f64().ceil() as u64,
            })),
        }
    }

    /// Append a step row, then publish it.
    async fn record(
        &self,
        ctx: &RunCtx,
        step: StepName,
        status: StepStatus,
        message: impl Into<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        let row = ProcessingStep {
            document_id: ctx.doc.id.clone(),
            run_id: ctx.run_id.clone(),
            step,
            status,
            progress: step.progress(),
            message: message.into(),
            error_message,
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.services.documents.append_step(&row).await?;
        self.services
            .progress
            .report(&ProgressEvent::from_step(&ctx.doc.owner_id, &row));
        Ok(())
    }

    /// Leave the state `step` runs in for `to`.
    async fn advance(
        &self,
        ctx: &RunCtx,
        step: StepName,
        to: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<bool> {
        let from = status_during(step);
        let ok = self
            .services
            .documents
            .transition(&ctx.doc.id, from, to, patch)
            .await?;
        debug!(document_id = %ctx.doc.id, from = %from, to = %to, ok, "transition");
        Ok(ok)
    }

    /// Terminal success (or partial success) plus the finalize row.
    async fn finish(
        &self,
        ctx: &RunCtx,
        step: StepName,
        to: DocumentStatus,
        patch: DocumentPatch,
        error: Option<String>,
    ) -> Result<RunOutcome> {
        let transition = self.advance(ctx, step, to, &patch);
        let advanced = match self.timed(ctx, StepName::Finalize, transition).await? {
            Ok(advanced) => advanced?,
            Err(timeout) => {
                self.record_failure(ctx, StepName::Finalize, &timeout).await?;
                return self.mark_failed(ctx, status_during(step), timeout, None).await;
            }
        };
        if !advanced {
            return self.lost(ctx).await;
        }
        let status = if error.is_some() {
            StepStatus::Warning
        } else {
            StepStatus::Completed
        };
        self.record(ctx, StepName::Finalize, status, to.as_str(), error.clone())
            .await?;
        Ok(RunOutcome::Finished {
            run_id: ctx.run_id.clone(),
            status: to,
            error,
        })
    }

    /// Record the failure on `step` and move the document to `Failed`.
    async fn fail(
        &self,
        ctx: &RunCtx,
        step: StepName,
        err: VaultError,
        virus_scan_status: Option<VirusScanStatus>,
    ) -> Result<RunOutcome> {
        self.record_failure(ctx, step, &err).await?;
        self.mark_failed(ctx, status_during(step), err, virus_scan_status)
            .await
    }

    async fn record_failure(&self, ctx: &RunCtx, step: StepName, err: &VaultError) -> Result<()> {
        let message = err.to_string();
        warn!(document_id = %ctx.doc.id, step = %step, error = %message, "pipeline step failed");
        let summary = format!("{} failed", step);
        self.record(ctx, step, StepStatus::Failed, summary, Some(message))
            .await
    }

    /// Move the document from `from` to `Failed` without writing a step row.
    async fn mark_failed(
        &self,
        ctx: &RunCtx,
        from: DocumentStatus,
        err: VaultError,
        virus_scan_status: Option<VirusScanStatus>,
    ) -> Result<RunOutcome> {
        let message = err.to_string();
        let patch = DocumentPatch {
            virus_scan_status,
            error_message: Some(Some(message.clone())),
            ..Default::default()
        };
        let ok = self
            .services
            .documents
            .transition(&ctx.doc.id, from, DocumentStatus::Failed, &patch)
            .await?;
        if !ok {
            return self.lost(ctx).await;
        }
        Ok(RunOutcome::Finished {
            run_id: ctx.run_id.clone(),
            status: DocumentStatus::Failed,
            error: Some(message),
        })
    }

    async fn lost(&self, ctx: &RunCtx) -> Result<RunOutcome> {
        let current = self
            .services
            .documents
            .get_document(&ctx.doc.id)
            .await?
            .map_or(DocumentStatus::Failed, |d| d.status);
        warn!(
            document_id = %ctx.doc.id,
            status = %current,
            "document changed under a running pipeline"
        );
        Ok(RunOutcome::NotClaimed { current })
    }
}

/// Document status while `step` is active.
fn status_during(step: StepName) -> DocumentStatus {
    match step {
        StepName::Scan => DocumentStatus::Scanning,
        StepName::Extract => DocumentStatus::TextExtracting,
        StepName::KeywordIndex => DocumentStatus::KeywordIndexing,
        StepName::VectorIndex | StepName::Finalize => DocumentStatus::VectorIndexing,
    }
}

/// Outcome of one index write. Backend errors degrade the run; a hard
/// timeout fails it.
enum IndexWrite {
    Done(std::result::Result<String, VaultError>),
    TimedOut(VaultError),
}

fn error_patch(message: String) -> DocumentPatch {
    DocumentPatch {
        error_message: Some(Some(message)),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Upload & status
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub owner_id: String,
    pub classification: Classification,
    pub title: Option<String>,
    /// Caller-facing id; a UUID is generated when absent.
    pub external_id: Option<String>,
}

/// Store the file's bytes under `storage_dir/<sha256>` and insert a
/// document in `Uploaded`.
pub async fn upload(
    documents: &dyn DocumentStore,
    storage_dir: &Path,
    req: &UploadRequest,
) -> Result<Document> {
    let bytes = tokio::fs::read(&req.path)
        .await
        .with_context(|| format!("Failed to read {}", req.path.display()))?;
    let filename = req
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file path: {}", req.path.display()))?
        .to_string();

    let file_hash = format!("{:x}", Sha256::digest(&bytes));
    tokio::fs::create_dir_all(storage_dir)
        .await
        .with_context(|| format!("Failed to create {}", storage_dir.display()))?;
    let storage_path = storage_dir.join(&file_hash);
    if !tokio::fs::try_exists(&storage_path).await.unwrap_or(false) {
        // Write-then-rename so a crash never leaves a truncated blob under
        // its final content address.
        let tmp = storage_dir.join(format!("{}.{}.tmp", file_hash, Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &storage_path).await?;
    }

    let now = chrono::Utc::now().timestamp();
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        external_id: req
            .external_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        mime_class: MimeClass::from_filename(&filename),
        filename,
        title: req.title.clone().filter(|t| !t.trim().is_empty()),
        owner_id: req.owner_id.clone(),
        classification: req.classification,
        size_bytes: bytes.len() as u64,
        file_hash,
        storage_path: storage_path.display().to_string(),
        status: DocumentStatus::Uploaded,
        virus_scan_status: VirusScanStatus::Pending,
        keyword_index_ref: None,
        vector_index_ref: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    };
    documents.insert_document(&doc).await?;
    info!(
        document_id = %doc.id,
        owner_id = %doc.owner_id,
        mime = %doc.mime_class,
        size_bytes = doc.size_bytes,
        "document uploaded"
    );
    Ok(doc)
}

/// Read contract plus the latest step rows of the latest run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub document: DocumentView,
    pub steps: Vec<ProcessingStep>,
}

pub async fn status(
    documents: &dyn DocumentStore,
    document_id: &str,
) -> Result<Option<StatusReport>> {
    let Some(doc) = documents.get_document(document_id).await? else {
        return Ok(None);
    };
    let steps = documents.steps(document_id).await?;
    Ok(Some(StatusReport {
        document: doc.view(),
        steps: latest_steps(&steps),
    }))
}

//! Pipeline scenarios over the in-memory store and indexes, with fake
//! scanner and extractor.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use docvault::ingest::{self, Pipeline, RunOutcome, Services, UploadRequest};
use docvault::progress::{ProgressEvent, ProgressReporter};
use docvault::scanner::ScanPolicy;
use docvault::traits::{ScanVerdict, Scanner, TextExtractor};
use docvault_core::models::{
    Classification, Document, DocumentAccess, DocumentPatch, DocumentStatus, MimeClass,
    ProcessingStep, StepName, StepStatus, VirusScanStatus,
};
use docvault_core::store::memory::{InMemoryStore, MemoryIndex};
use docvault_core::store::DocumentStore;
use docvault_core::timeouts::{StepBudget, TimeoutConfig};

// ── fakes ────────────────────────────────────────────────────────────────

struct FakeScanner {
    verdict: ScanVerdict,
    /// When set, the scan waits for a notification before answering.
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Scanner for FakeScanner {
    fn name(&self) -> &str {
        "fake"
    }

    async fn scan(&self, _path: &Path) -> ScanVerdict {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.verdict.clone()
    }
}

struct FakeExtractor {
    text: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, _bytes: Vec<u8>, _mime: MimeClass) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.text {
            Some(t) => Ok(t.clone()),
            None => bail!("corrupt file"),
        }
    }
}

/// Delegates to the in-memory store with injected storage faults.
struct FaultyStore {
    inner: Arc<InMemoryStore>,
    /// Stall before any successful terminal transition.
    finalize_delay: Duration,
    /// Step log writes and transitions to `Failed` error out.
    broken: bool,
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.inner.insert_document(doc).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn transition(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<bool> {
        if self.broken && next == DocumentStatus::Failed {
            bail!("database is read-only");
        }
        if matches!(
            next,
            DocumentStatus::Indexed | DocumentStatus::Stored | DocumentStatus::PartiallyIndexed
        ) {
            tokio::time::sleep(self.finalize_delay).await;
        }
        self.inner.transition(id, expected, next, patch).await
    }

    async fn append_step(&self, step: &ProcessingStep) -> Result<()> {
        if self.broken {
            bail!("disk full");
        }
        self.inner.append_step(step).await
    }

    async fn steps(&self, document_id: &str) -> Result<Vec<ProcessingStep>> {
        self.inner.steps(document_id).await
    }

    async fn searchable_documents(&self) -> Result<Vec<DocumentAccess>> {
        self.inner.searchable_documents().await
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl Recorder {
    fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressReporter for Recorder {
    fn report(&self, event: &ProgressEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ── harness ──────────────────────────────────────────────────────────────

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryStore>,
    keyword: Arc<MemoryIndex>,
    vector: Arc<MemoryIndex>,
    extractor: Arc<FakeExtractor>,
    events: Arc<Recorder>,
    pipeline: Pipeline,
}

struct Setup {
    verdict: ScanVerdict,
    gate: Option<Arc<Notify>>,
    text: Option<String>,
    extract_delay: Duration,
    finalize_delay: Duration,
    broken_store: bool,
    timeouts: TimeoutConfig,
    policy: ScanPolicy,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            verdict: ScanVerdict::Clean,
            gate: None,
            text: Some(sample_text(10_000)),
            extract_delay: Duration::ZERO,
            finalize_delay: Duration::ZERO,
            broken_store: false,
            timeouts: TimeoutConfig::default(),
            policy: ScanPolicy::FailOpen,
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let keyword = Arc::new(MemoryIndex::new("keyword").with_scope_filter());
    let vector = Arc::new(MemoryIndex::new("vector"));
    let extractor = Arc::new(FakeExtractor {
        text: setup.text,
        delay: setup.extract_delay,
        calls: AtomicUsize::new(0),
    });
    let events = Arc::new(Recorder::default());
    let documents: Arc<dyn DocumentStore> =
        if setup.finalize_delay.is_zero() && !setup.broken_store {
            store.clone()
        } else {
            Arc::new(FaultyStore {
                inner: store.clone(),
                finalize_delay: setup.finalize_delay,
                broken: setup.broken_store,
            })
        };
    let services = Services {
        documents,
        scanner: Arc::new(FakeScanner {
            verdict: setup.verdict,
            gate: setup.gate,
        }),
        extractor: extractor.clone(),
        keyword: keyword.clone(),
        vector: vector.clone(),
        progress: events.clone(),
    };
    Harness {
        dir: TempDir::new().unwrap(),
        store,
        keyword,
        vector,
        extractor,
        events,
        pipeline: Pipeline::new(services, setup.timeouts, setup.policy),
    }
}

fn sample_text(chars: usize) -> String {
    "Quarterly revenue grew in every region. "
        .repeat(chars / 40 + 1)
        .chars()
        .take(chars)
        .collect()
}

impl Harness {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Document {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        let req = UploadRequest {
            path,
            owner_id: "alice".into(),
            classification: Classification::Internal,
            title: None,
            external_id: None,
        };
        ingest::upload(self.store.as_ref(), &self.dir.path().join("storage"), &req)
            .await
            .unwrap()
    }

    async fn doc(&self, id: &str) -> Document {
        self.store.get_document(id).await.unwrap().unwrap()
    }

    async fn run(&self, id: &str) -> RunOutcome {
        self.pipeline.run(id).await.unwrap()
    }
}

fn finished_status(outcome: &RunOutcome) -> DocumentStatus {
    match outcome {
        RunOutcome::Finished { status, .. } => *status,
        other => panic!("run was not claimed: {:?}", other),
    }
}

// ── scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_pdf_with_text_is_indexed() {
    let h = harness(Setup::default());
    let doc = h.upload("report.pdf", &vec![0u8; 2 * 1024 * 1024]).await;
    assert_eq!(doc.mime_class, MimeClass::Pdf);
    assert_eq!(doc.status, DocumentStatus::Uploaded);

    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::Indexed);

    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert!(doc.keyword_index_ref.is_some());
    assert!(doc.vector_index_ref.is_some());
    assert!(doc.error_message.is_none());
    assert_eq!(doc.virus_scan_status, VirusScanStatus::Clean);
    assert_eq!(h.keyword.write_count(), 1);
    assert_eq!(h.vector.write_count(), 1);
}

#[tokio::test]
async fn vector_failure_is_partial_and_names_backend() {
    let h = harness(Setup::default());
    h.vector.fail_writes(true);
    let doc = h.upload("report.pdf", &vec![0u8; 2 * 1024 * 1024]).await;

    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::PartiallyIndexed);

    let doc = h.doc(&doc.id).await;
    assert!(doc.keyword_index_ref.is_some());
    assert!(doc.vector_index_ref.is_none());
    let err = doc.error_message.unwrap();
    assert!(err.contains("vector"), "{}", err);
}

#[tokio::test]
async fn keyword_failure_is_partial_and_keeps_vector_ref() {
    let h = harness(Setup::default());
    h.keyword.fail_writes(true);
    let doc = h.upload("notes.txt", b"hello").await;

    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::PartiallyIndexed);
    assert!(doc.keyword_index_ref.is_none());
    assert!(doc.vector_index_ref.is_some());
    assert!(doc.error_message.unwrap().contains("keyword"));
}

#[tokio::test]
async fn both_backends_failing_fails_the_run() {
    let h = harness(Setup::default());
    h.keyword.fail_writes(true);
    h.vector.fail_writes(true);
    let doc = h.upload("notes.txt", b"hello").await;

    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Failed);
    let err = doc.error_message.unwrap();
    assert!(err.contains("keyword") && err.contains("vector"), "{}", err);
}

#[tokio::test]
async fn image_is_stored_without_vector_write() {
    let h = harness(Setup::default());
    let doc = h.upload("photo.png", b"\x89PNG\r\n\x1a\n").await;

    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::Stored);

    let doc = h.doc(&doc.id).await;
    assert!(doc.keyword_index_ref.is_some());
    assert!(doc.vector_index_ref.is_none());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.vector.write_count(), 0);
    assert_eq!(h.keyword.write_count(), 1);

    let steps = h.store.steps(&doc.id).await.unwrap();
    assert!(steps
        .iter()
        .any(|s| s.step == StepName::VectorIndex && s.status == StepStatus::Skipped));
}

#[tokio::test]
async fn whitespace_text_is_stored() {
    let h = harness(Setup {
        text: Some("  \n\t ".into()),
        ..Default::default()
    });
    let doc = h.upload("blank.txt", b"   ").await;
    h.run(&doc.id).await;
    assert_eq!(h.doc(&doc.id).await.status, DocumentStatus::Stored);
    assert_eq!(h.vector.write_count(), 0);
}

#[tokio::test]
async fn image_with_keyword_down_fails() {
    let h = harness(Setup::default());
    h.keyword.fail_writes(true);
    let doc = h.upload("photo.png", b"\x89PNG").await;
    h.run(&doc.id).await;
    assert_eq!(h.doc(&doc.id).await.status, DocumentStatus::Failed);
}

#[tokio::test]
async fn empty_text_keyword_failure_records_one_failure() {
    let h = harness(Setup::default());
    h.keyword.fail_writes(true);
    let doc = h.upload("diagram.png", b"\x89PNG").await;
    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::Failed);

    let events = h.events.events();
    assert!(
        events.windows(2).all(|w| w[0].progress <= w[1].progress),
        "{:?}",
        events.iter().map(|e| e.progress).collect::<Vec<_>>()
    );

    let steps = h.store.steps(&doc.id).await.unwrap();
    let keyword_failures = steps
        .iter()
        .filter(|s| s.step == StepName::KeywordIndex && s.status == StepStatus::Failed)
        .count();
    assert_eq!(keyword_failures, 1);
    assert!(steps.iter().all(|s| s.step != StepName::VectorIndex));
    assert_eq!(h.vector.write_count(), 0);
}

#[tokio::test]
async fn extraction_error_fails_with_unsupported_format() {
    let h = harness(Setup {
        text: None,
        ..Default::default()
    });
    let doc = h.upload("broken.docx", b"PK").await;
    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.unwrap().contains("unsupported format"));
    assert_eq!(h.keyword.write_count(), 0);
}

#[tokio::test]
async fn infected_upload_is_a_security_violation() {
    let h = harness(Setup {
        verdict: ScanVerdict::Infected("Eicar-Test-Signature".into()),
        ..Default::default()
    });
    let doc = h.upload("eicar.txt", b"X5O!P%@AP").await;

    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.virus_scan_status, VirusScanStatus::Infected);
    let err = doc.error_message.unwrap();
    assert!(err.contains("security violation"), "{}", err);
    assert!(err.contains("Eicar-Test-Signature"), "{}", err);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);

    // The failure event repeats the progress of the step it failed in.
    let last = h.events.events().pop().unwrap();
    assert_eq!(last.step, StepName::Scan);
    assert_eq!(last.status, StepStatus::Failed);
    assert_eq!(last.progress, 10);
}

#[tokio::test]
async fn scan_error_fail_open_proceeds() {
    let h = harness(Setup {
        verdict: ScanVerdict::Error("connection refused".into()),
        policy: ScanPolicy::FailOpen,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.virus_scan_status, VirusScanStatus::Error);
    let steps = h.store.steps(&doc.id).await.unwrap();
    assert!(steps
        .iter()
        .any(|s| s.step == StepName::Scan && s.status == StepStatus::Warning));
}

#[tokio::test]
async fn scan_error_fail_closed_fails() {
    let h = harness(Setup {
        verdict: ScanVerdict::Error("connection refused".into()),
        policy: ScanPolicy::FailClosed,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    h.run(&doc.id).await;
    let doc = h.doc(&doc.id).await;
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.unwrap().contains("scan unavailable"));
}

#[tokio::test]
async fn scan_policy_is_captured_at_run_start() {
    let gate = Arc::new(Notify::new());
    let h = harness(Setup {
        verdict: ScanVerdict::Error("clamd down".into()),
        gate: Some(gate.clone()),
        policy: ScanPolicy::FailOpen,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    let handle = h.pipeline.spawn(&doc.id);
    // Wait until the scan is in flight, then flip the policy under it.
    for _ in 0..200 {
        if h.doc(&doc.id).await.status == DocumentStatus::Scanning {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.pipeline.set_scan_policy(ScanPolicy::FailClosed);
    gate.notify_one();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(finished_status(&outcome), DocumentStatus::Indexed);

    // A run started after the change uses the new policy.
    let second = h.upload("other.txt", b"world").await;
    let handle = h.pipeline.spawn(&second.id);
    gate.notify_one();
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(finished_status(&outcome), DocumentStatus::Failed);
}

#[tokio::test]
async fn hard_timeout_fails_the_run() {
    let mut timeouts = TimeoutConfig::default();
    timeouts.extract = StepBudget::new(0.05, 0.0);
    let h = harness(Setup {
        extract_delay: Duration::from_secs(5),
        timeouts,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::Failed);

    let doc = h.doc(&doc.id).await;
    let err = doc.error_message.unwrap();
    assert!(err.contains("timeout exceeded during extract"), "{}", err);

    let steps = h.store.steps(&doc.id).await.unwrap();
    assert!(steps
        .iter()
        .any(|s| s.step == StepName::Extract && s.status == StepStatus::Warning));
    assert_eq!(h.keyword.write_count(), 0);
}

#[tokio::test]
async fn finalize_timeout_fails_the_run() {
    let mut timeouts = TimeoutConfig::default();
    timeouts.finalize = StepBudget::new(0.05, 0.0);
    let h = harness(Setup {
        finalize_delay: Duration::from_secs(5),
        timeouts,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    let outcome = h.run(&doc.id).await;
    assert_eq!(finished_status(&outcome), DocumentStatus::Failed);

    let doc = h.doc(&doc.id).await;
    let err = doc.error_message.unwrap();
    assert!(err.contains("timeout exceeded during finalize"), "{}", err);

    let steps = h.store.steps(&doc.id).await.unwrap();
    assert!(steps
        .iter()
        .any(|s| s.step == StepName::Finalize && s.status == StepStatus::Failed));
}

#[tokio::test]
async fn storage_fault_surfaces_the_original_error() {
    let h = harness(Setup {
        broken_store: true,
        ..Default::default()
    });
    let doc = h.upload("notes.txt", b"hello").await;

    // Marking the run failed also errors; the caller still sees the first fault.
    let err = h.pipeline.run(&doc.id).await.unwrap_err();
    assert!(format!("{:#}", err).contains("disk full"), "{:#}", err);
    assert!(!h.doc(&doc.id).await.status.is_terminal());
}

#[tokio::test]
async fn duplicate_run_is_a_no_op() {
    let h = harness(Setup::default());
    let doc = h.upload("notes.txt", b"hello").await;

    let (a, b) = tokio::join!(h.pipeline.run(&doc.id), h.pipeline.run(&doc.id));
    let outcomes = [a.unwrap(), b.unwrap()];
    let claimed = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Finished { .. }))
        .count();
    assert_eq!(claimed, 1);

    let again = h.run(&doc.id).await;
    assert_eq!(
        again,
        RunOutcome::NotClaimed {
            current: DocumentStatus::Indexed
        }
    );
    assert_eq!(h.keyword.write_count(), 1);
    assert_eq!(h.vector.write_count(), 1);
}

#[tokio::test]
async fn retry_only_from_failed_and_reruns() {
    let h = harness(Setup::default());
    h.keyword.fail_writes(true);
    h.vector.fail_writes(true);
    let doc = h.upload("notes.txt", b"hello").await;
    h.run(&doc.id).await;
    assert_eq!(h.doc(&doc.id).await.status, DocumentStatus::Failed);

    h.keyword.fail_writes(false);
    h.vector.fail_writes(false);
    let run_id = h.pipeline.retry(&doc.id).await.unwrap();
    assert!(!run_id.is_empty());

    let mut status = DocumentStatus::Uploaded;
    for _ in 0..200 {
        status = h.doc(&doc.id).await.status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(status, DocumentStatus::Indexed);
    let doc = h.doc(&doc.id).await;
    assert!(doc.error_message.is_none());

    let steps = h.store.steps(&doc.id).await.unwrap();
    assert!(steps.iter().any(|s| s.run_id == run_id));

    let err = h.pipeline.retry(&doc.id).await.unwrap_err();
    assert!(err.to_string().contains("invalid status transition"), "{}", err);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_finalize() {
    let h = harness(Setup::default());
    let doc = h.upload("notes.md", b"# hello").await;
    h.run(&doc.id).await;

    let events = h.events.events();
    assert!(events.iter().all(|e| e.document_id == doc.id && e.owner_id == "alice"));
    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
    let last = events.last().unwrap();
    assert_eq!(last.step, StepName::Finalize);
    assert_eq!(last.progress, 100);

    // Events mirror the committed step rows one-for-one.
    let steps = h.store.steps(&doc.id).await.unwrap();
    assert_eq!(steps.len(), events.len());
}

#[tokio::test]
async fn status_reports_latest_steps() {
    let h = harness(Setup::default());
    let doc = h.upload("notes.txt", b"hello").await;
    h.run(&doc.id).await;

    let report = ingest::status(h.store.as_ref(), &doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.document.status, DocumentStatus::Indexed);
    let names: Vec<StepName> = report.steps.iter().map(|s| s.step).collect();
    assert!(names.contains(&StepName::Scan));
    assert!(names.contains(&StepName::Finalize));
    assert!(report.steps.iter().all(|s| s.status != StepStatus::Running));

    assert!(ingest::status(h.store.as_ref(), "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn upload_is_content_addressed() {
    let h = harness(Setup::default());
    let a = h.upload("a.txt", b"same bytes").await;
    let b = h.upload("b.txt", b"same bytes").await;
    assert_ne!(a.id, b.id);
    assert_eq!(a.file_hash, b.file_hash);
    assert_eq!(a.storage_path, b.storage_path);
    assert_eq!(std::fs::read(&a.storage_path).unwrap(), b"same bytes");
}

//! Core data model shared by the ingestion pipeline, the retrieval engine,
//! and the chat-context stages.
//!
//! Everything here is plain data. Persistence lives behind the traits in
//! [`crate::store`]; orchestration lives in the application crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;

// ═══════════════════════════════════════════════════════════════════════
// Document lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle status of a [`Document`].
///
/// Forward order is `Uploaded → Scanning → TextExtracting → KeywordIndexing
/// → VectorIndexing → Indexed`. `Stored`, `PartiallyIndexed` and `Failed`
/// are side branches; see [`DocumentStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Scanning,
    TextExtracting,
    KeywordIndexing,
    VectorIndexing,
    Indexed,
    Stored,
    PartiallyIndexed,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 9] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Scanning,
        DocumentStatus::TextExtracting,
        DocumentStatus::KeywordIndexing,
        DocumentStatus::VectorIndexing,
        DocumentStatus::Indexed,
        DocumentStatus::Stored,
        DocumentStatus::PartiallyIndexed,
        DocumentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Scanning => "scanning",
            DocumentStatus::TextExtracting => "text_extracting",
            DocumentStatus::KeywordIndexing => "keyword_indexing",
            DocumentStatus::VectorIndexing => "vector_indexing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Stored => "stored",
            DocumentStatus::PartiallyIndexed => "partially_indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Position on the forward path. Side branches share the rank of the
    /// step they can be entered from last.
    fn forward_rank(&self) -> u8 {
        match self {
            DocumentStatus::Uploaded => 0,
            DocumentStatus::Scanning => 1,
            DocumentStatus::TextExtracting => 2,
            DocumentStatus::KeywordIndexing => 3,
            DocumentStatus::VectorIndexing => 4,
            DocumentStatus::Indexed
            | DocumentStatus::Stored
            | DocumentStatus::PartiallyIndexed
            | DocumentStatus::Failed => 5,
        }
    }

    /// Terminal states end a run. Only `Failed` can be left again, via retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Indexed
                | DocumentStatus::Stored
                | DocumentStatus::PartiallyIndexed
                | DocumentStatus::Failed
        )
    }

    /// Documents in these states are visible to retrieval.
    pub fn is_searchable(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Indexed | DocumentStatus::Stored | DocumentStatus::PartiallyIndexed
        )
    }

    /// The transition table.
    ///
    /// - Any non-terminal state may move to `Failed`.
    /// - `Failed → Uploaded` is the retry edge, and the only way out of a
    ///   terminal state.
    /// - `Stored` is reachable only from `KeywordIndexing` (empty text).
    /// - `PartiallyIndexed` is reachable only from `VectorIndexing`.
    /// - Otherwise only single forward steps are legal.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (*self, next) {
            (Failed, Uploaded) => true,
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (KeywordIndexing, Stored) => true,
            (VectorIndexing, PartiallyIndexed) => true,
            (VectorIndexing, Indexed) => true,
            (_, Stored) | (_, PartiallyIndexed) | (_, Indexed) => false,
            (from, to) => to.forward_rank() == from.forward_rank() + 1,
        }
    }

    /// Like [`can_transition_to`](Self::can_transition_to), but as a `Result`.
    pub fn check_transition(&self, next: DocumentStatus) -> Result<(), VaultError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(VaultError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown document status: '{}'", s))
    }
}

/// Outcome of the safety scan as recorded on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirusScanStatus {
    Pending,
    Clean,
    Infected,
    Error,
    Skipped,
}

impl VirusScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirusScanStatus::Pending => "pending",
            VirusScanStatus::Clean => "clean",
            VirusScanStatus::Infected => "infected",
            VirusScanStatus::Error => "error",
            VirusScanStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for VirusScanStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VirusScanStatus::Pending),
            "clean" => Ok(VirusScanStatus::Clean),
            "infected" => Ok(VirusScanStatus::Infected),
            "error" => Ok(VirusScanStatus::Error),
            "skipped" => Ok(VirusScanStatus::Skipped),
            other => anyhow::bail!("unknown virus scan status: '{}'", other),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Classification & mime classes
// ═══════════════════════════════════════════════════════════════════════

/// Ordered sensitivity tier of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Internal,
    Restricted,
    TopSecret,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Public => "public",
            Classification::Internal => "internal",
            Classification::Restricted => "restricted",
            Classification::TopSecret => "top_secret",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "public" => Ok(Classification::Public),
            "internal" => Ok(Classification::Internal),
            "restricted" => Ok(Classification::Restricted),
            "top_secret" | "topsecret" => Ok(Classification::TopSecret),
            other => anyhow::bail!(
                "unknown classification: '{}'. Use public, internal, restricted, or top_secret.",
                other
            ),
        }
    }
}

/// Coarse file-format class, derived from the upload's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeClass {
    Text,
    Markdown,
    Csv,
    Json,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Image,
    Archive,
    Binary,
}

impl MimeClass {
    pub const ALL: [MimeClass; 11] = [
        MimeClass::Text,
        MimeClass::Markdown,
        MimeClass::Csv,
        MimeClass::Json,
        MimeClass::Pdf,
        MimeClass::Docx,
        MimeClass::Pptx,
        MimeClass::Xlsx,
        MimeClass::Image,
        MimeClass::Archive,
        MimeClass::Binary,
    ];

    /// Classify a file by extension (case-insensitive). Unknown extensions
    /// are `Binary`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" | "rst" => MimeClass::Text,
            "md" | "markdown" => MimeClass::Markdown,
            "csv" | "tsv" => MimeClass::Csv,
            "json" | "jsonl" => MimeClass::Json,
            "pdf" => MimeClass::Pdf,
            "docx" => MimeClass::Docx,
            "pptx" => MimeClass::Pptx,
            "xlsx" => MimeClass::Xlsx,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tiff" | "svg" => MimeClass::Image,
            "zip" | "tar" | "gz" | "tgz" | "7z" | "rar" => MimeClass::Archive,
            _ => MimeClass::Binary,
        }
    }

    /// Classify by the extension of a file name or path.
    pub fn from_filename(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => MimeClass::from_extension(ext),
            _ => MimeClass::Binary,
        }
    }

    /// Whether the extractor is expected to produce text for this class.
    pub fn is_text_bearing(&self) -> bool {
        matches!(
            self,
            MimeClass::Text
                | MimeClass::Markdown
                | MimeClass::Csv
                | MimeClass::Json
                | MimeClass::Pdf
                | MimeClass::Docx
                | MimeClass::Pptx
                | MimeClass::Xlsx
        )
    }

    /// Plain-text classes are cheap to process; the rest get wider
    /// timeout headroom.
    pub fn is_plain_text(&self) -> bool {
        matches!(
            self,
            MimeClass::Text | MimeClass::Markdown | MimeClass::Csv | MimeClass::Json
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeClass::Text => "text",
            MimeClass::Markdown => "markdown",
            MimeClass::Csv => "csv",
            MimeClass::Json => "json",
            MimeClass::Pdf => "pdf",
            MimeClass::Docx => "docx",
            MimeClass::Pptx => "pptx",
            MimeClass::Xlsx => "xlsx",
            MimeClass::Image => "image",
            MimeClass::Archive => "archive",
            MimeClass::Binary => "binary",
        }
    }
}

impl fmt::Display for MimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MimeClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MimeClass::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown mime class: '{}'", s))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Documents & processing steps
// ═══════════════════════════════════════════════════════════════════════

/// An uploaded file and its processing state.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Internal opaque id (UUID).
    pub id: String,
    /// Stable caller-facing id.
    pub external_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub owner_id: String,
    pub classification: Classification,
    pub mime_class: MimeClass,
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes (hex).
    pub file_hash: String,
    pub storage_path: String,
    pub status: DocumentStatus,
    pub virus_scan_status: VirusScanStatus,
    pub keyword_index_ref: Option<String>,
    pub vector_index_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// Title shown to users and matched by the grounding verifier.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }

    /// The caller-facing read contract.
    pub fn view(&self) -> DocumentView {
        DocumentView {
            id: self.id.clone(),
            external_id: self.external_id.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
            keyword_index_ref: self.keyword_index_ref.clone(),
            vector_index_ref: self.vector_index_ref.clone(),
            virus_scan_status: self.virus_scan_status,
        }
    }

    /// Projection used by scope resolution and retrieval.
    pub fn access(&self) -> DocumentAccess {
        DocumentAccess {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            classification: self.classification,
            title: self.display_title().to_string(),
            mime_class: self.mime_class,
            updated_at: self.updated_at,
        }
    }
}

/// Read contract exposed for a document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub id: String,
    pub external_id: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub keyword_index_ref: Option<String>,
    pub vector_index_ref: Option<String>,
    pub virus_scan_status: VirusScanStatus,
}

/// Field updates applied atomically with a status transition.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub virus_scan_status: Option<VirusScanStatus>,
    pub keyword_index_ref: Option<Option<String>>,
    pub vector_index_ref: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
}

impl DocumentPatch {
    pub fn apply(&self, doc: &mut Document) {
        if let Some(s) = self.virus_scan_status {
            doc.virus_scan_status = s;
        }
        if let Some(r) = &self.keyword_index_ref {
            doc.keyword_index_ref = r.clone();
        }
        if let Some(r) = &self.vector_index_ref {
            doc.vector_index_ref = r.clone();
        }
        if let Some(e) = &self.error_message {
            doc.error_message = e.clone();
        }
    }
}

/// Pipeline step names, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Scan,
    Extract,
    KeywordIndex,
    VectorIndex,
    Finalize,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Scan => "scan",
            StepName::Extract => "extract",
            StepName::KeywordIndex => "keyword_index",
            StepName::VectorIndex => "vector_index",
            StepName::Finalize => "finalize",
        }
    }

    /// Progress percentage reported when this step starts (and, on
    /// failure, repeated by the failure event).
    pub fn progress(&self) -> u8 {
        match self {
            StepName::Scan => 10,
            StepName::Extract => 30,
            StepName::KeywordIndex => 60,
            StepName::VectorIndex => 80,
            StepName::Finalize => 100,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(StepName::Scan),
            "extract" => Ok(StepName::Extract),
            "keyword_index" => Ok(StepName::KeywordIndex),
            "vector_index" => Ok(StepName::VectorIndex),
            "finalize" => Ok(StepName::Finalize),
            other => anyhow::bail!("unknown step: '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Skipped,
    Warning,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Warning => "warning",
            StepStatus::Failed => "failed",
        }
    }
}

impl FromStr for StepStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "skipped" => Ok(StepStatus::Skipped),
            "warning" => Ok(StepStatus::Warning),
            "failed" => Ok(StepStatus::Failed),
            other => anyhow::bail!("unknown step status: '{}'", other),
        }
    }
}

/// One append-only row of pipeline history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStep {
    pub document_id: String,
    pub run_id: String,
    pub step: StepName,
    pub status: StepStatus,
    pub progress: u8,
    pub message: String,
    pub error_message: Option<String>,
    pub timestamp: i64,
}

/// Keep only the latest row per step of the most recent run.
///
/// `steps` must be in insertion order.
pub fn latest_steps(steps: &[ProcessingStep]) -> Vec<ProcessingStep> {
    let Some(last_run) = steps.last().map(|s| s.run_id.clone()) else {
        return Vec::new();
    };
    let mut out: Vec<ProcessingStep> = Vec::new();
    for s in steps.iter().filter(|s| s.run_id == last_run) {
        match out.iter_mut().find(|o| o.step == s.step) {
            Some(existing) => *existing = s.clone(),
            None => out.push(s.clone()),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Principals
// ═══════════════════════════════════════════════════════════════════════

/// Closed role set. Ranks are fixed; see [`Role::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Legacy read-only role.
    Viewer,
    Analyst,
    Manager,
    Admin,
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Analyst => 1,
            Role::Manager => 2,
            Role::Admin => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Analyst => "analyst",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" | "user" => Ok(Role::Viewer),
            "analyst" => Ok(Role::Analyst),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!(
                "unknown role: '{}'. Use admin, manager, analyst, or viewer.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub manager_id: Option<String>,
}

/// Per-document fields needed for scoping, ranking and grounding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAccess {
    pub id: String,
    pub owner_id: String,
    pub classification: Classification,
    pub title: String,
    pub mime_class: MimeClass,
    pub updated_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
// Retrieval & context
// ═══════════════════════════════════════════════════════════════════════

/// Which backends contributed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Keyword,
    Vector,
    Both,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedCandidate {
    pub document_id: String,
    /// Blended score in `[0.0, 1.0]`.
    pub score: f64,
    pub snippet: String,
    pub provenance: Provenance,
    pub title: String,
    pub mime_class: MimeClass,
    pub updated_at: i64,
}

/// Packing priority; declaration order is ascending so `Critical` is max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityTier {
    /// Highest first.
    pub const DESCENDING: [PriorityTier; 4] = [
        PriorityTier::Critical,
        PriorityTier::High,
        PriorityTier::Medium,
        PriorityTier::Low,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UserMessage,
    Document,
    History,
    Metadata,
}

/// One unit of prompt content considered by the allocator.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub content: String,
    pub tier: PriorityTier,
    pub token_count: usize,
    pub source_kind: SourceKind,
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A prior conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// A chunk of extracted text, as written by the index backends.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

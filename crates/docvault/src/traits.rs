//! Collaborator traits the pipeline and chat layer call out to.
//!
//! ```text
//!  stored file ──▶ Scanner ──▶ TextExtractor ──▶ IndexBackend × 2
//!                                                (docvault_core::store)
//!
//!  allocated prompt ──▶ AnswerGenerator ──▶ grounding::verify
//! ```
//!
//! Each is a suspension point of a pipeline run or chat turn and is always
//! awaited under an explicit timeout by its caller. Implementations live in
//! [`crate::scanner`], [`crate::extract`] and [`crate::llm`]; the test
//! suites plug in fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use docvault_core::models::MimeClass;

/// What a scanner concluded about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// Signature name reported by the engine.
    Infected(String),
    /// The engine could not produce a verdict.
    Error(String),
    /// Scanning is turned off.
    Skipped,
}

/// Safety scanner for stored uploads.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &str;

    /// Scan the file at `path`. Transport failures are reported as
    /// [`ScanVerdict::Error`], not as `Err`.
    async fn scan(&self, path: &Path) -> ScanVerdict;
}

/// Converts stored bytes to plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes` of the given class. Non-text-bearing
    /// classes yield `Ok(String::new())`.
    async fn extract(&self, bytes: Vec<u8>, mime: MimeClass) -> Result<String>;
}

/// Produces an answer from an allocated prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

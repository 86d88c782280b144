//! Error taxonomy for ingestion, scoping and chat-context preparation.
//!
//! Note what is *not* here: an out-of-scope document is never an error.
//! Scope denial resolves to an empty result set so callers cannot test for
//! the existence of documents they may not see.

use thiserror::Error;

use crate::models::{DocumentStatus, StepName};

#[derive(Debug, Error)]
pub enum VaultError {
    /// The safety scanner found malware. Fatal; never retried automatically.
    #[error("security violation: file is infected ({0})")]
    SecurityViolation(String),

    /// The scanner could not produce a verdict. Fatal only under a
    /// fail-closed scan policy.
    #[error("scan unavailable: {0}")]
    ScanUnavailable(String),

    /// Extraction failed for a text-bearing format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A keyword or vector backend could not be reached or rejected the call.
    #[error("{backend} index unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The active step ran past its hard time budget.
    #[error("timeout exceeded during {step} after {secs}s")]
    TimeoutExceeded { step: StepName, secs: u64 },

    /// Too few sources to attempt an answer.
    #[error("insufficient context: {available} source(s) available, {required} required")]
    InsufficientContext { available: usize, required: usize },

    /// The explicit document selection was malformed.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },
}

impl VaultError {
    /// Convenience constructor for backend failures.
    pub fn backend(backend: &str, err: impl std::fmt::Display) -> Self {
        VaultError::BackendUnavailable {
            backend: backend.to_string(),
            reason: err.to_string(),
        }
    }
}

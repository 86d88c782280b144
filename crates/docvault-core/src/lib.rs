//! # DocVault Core
//!
//! Pure logic for DocVault: data model, status transition table, access
//! scope resolution, adaptive time budgets, hybrid retrieval, context
//! budget allocation, answer grounding, and the storage/index traits the
//! application implements.
//!
//! This crate contains no tokio runtime, sqlx, or filesystem I/O.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, statuses, principals, candidates, context items |
//! | [`error`] | [`error::VaultError`] taxonomy |
//! | [`chunk`] | Paragraph chunker and token estimate |
//! | [`scope`] | Role/classification scope resolver |
//! | [`timeouts`] | Soft/hard step budgets |
//! | [`store`] | `DocumentStore`, `PrincipalDirectory`, `IndexBackend` + in-memory impls |
//! | [`search`] | Hybrid retrieval engine |
//! | [`context`] | Token budget allocator |
//! | [`grounding`] | Answer grounding verifier |
//! | [`embedding`] | Embedding trait, hash embedder, vector helpers |

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod grounding;
pub mod models;
pub mod scope;
pub mod search;
pub mod store;
pub mod timeouts;

pub use error::VaultError;

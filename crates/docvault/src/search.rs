//! Scoped hybrid search for the CLI.
//!
//! The ranking algorithm (scope resolution, per-backend normalization,
//! weighted blend) lives in `docvault_core::search`. This wrapper builds the
//! SQLite-backed [`HybridSearcher`](docvault_core::search::HybridSearcher)
//! and formats results for stdout.

use anyhow::Result;

use docvault_core::models::RetrievedCandidate;
use docvault_core::search::SearchRequest;

use crate::config::Config;
use crate::vault::Vault;

/// Search as `principal_id`. An empty `selection` is the same as none.
pub async fn search_documents(
    vault: &Vault,
    query: &str,
    principal_id: &str,
    selection: &[String],
    limit: Option<usize>,
) -> Result<Vec<RetrievedCandidate>> {
    let searcher = vault.searcher();
    let request = SearchRequest {
        query,
        principal_id,
        explicit_selection: Some(selection),
        limit: limit.unwrap_or(vault.config.retrieval.final_limit),
    };
    searcher.search(&request).await
}

/// CLI entry point: `dv search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    principal_id: &str,
    selection: &[String],
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let vault = Vault::open(config).await?;
    let results = search_documents(&vault, query, principal_id, selection, limit).await?;
    vault.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            result.score,
            result.title,
            result.mime_class
        );
        println!("    matched: {:?}", result.provenance);
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.document_id);
        println!();
    }

    Ok(())
}

//! `dv context` and `dv ask`.

use anyhow::{Context, Result};
use std::path::Path;

use docvault_core::models::ChatTurn;

use crate::chat::{TurnOutcome, TurnRequest};
use crate::config::Config;
use crate::vault::Vault;

/// Prior turns from a JSON file: `[{"role": "user", "content": "..."}, ...]`.
pub fn load_history(path: Option<&Path>) -> Result<Vec<ChatTurn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}

/// Print the prompt that `ask` would send.
pub async fn run_context(
    config: &Config,
    message: &str,
    principal_id: &str,
    selection: &[String],
    history: &[ChatTurn],
    json: bool,
) -> Result<()> {
    let vault = Vault::open(config).await?;
    let chat = vault.chat()?;
    let prepared = chat
        .prepare_turn(&TurnRequest {
            principal_id,
            message,
            explicit_selection: Some(selection),
            history,
        })
        .await?;
    vault.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
        return Ok(());
    }

    let meta = &prepared.allocation.metadata;
    println!(
        "Context: {}/{} tokens ({:.1}%), {} source(s), balanced={}",
        meta.tokens_used,
        meta.budget_tokens,
        meta.utilization_pct,
        prepared.candidates.len(),
        meta.balanced
    );
    let tiers = &meta.tiers;
    for (name, t) in [
        ("critical", &tiers.critical),
        ("high", &tiers.high),
        ("medium", &tiers.medium),
        ("low", &tiers.low),
    ] {
        println!(
            "  {:<8} included={} truncated={} excluded={}",
            name, t.included, t.truncated, t.excluded
        );
    }
    println!();
    println!("{}", prepared.allocation.prompt);
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    message: &str,
    principal_id: &str,
    selection: &[String],
    history: &[ChatTurn],
    json: bool,
) -> Result<()> {
    let vault = Vault::open(config).await?;
    let chat = vault.chat()?;
    let outcome = chat
        .answer(&TurnRequest {
            principal_id,
            message,
            explicit_selection: Some(selection),
            history,
        })
        .await;
    vault.close().await;
    let outcome = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        TurnOutcome::InsufficientContext { message, sources } => {
            println!("{}", message);
            for s in &sources {
                println!("  - {} [{}]", s.title, s.document_id);
            }
        }
        TurnOutcome::Answered {
            answer,
            model,
            grounding,
            sources,
        } => {
            println!("{}", answer.trim());
            println!();
            println!(
                "grounded={} confidence={:.2} (references {:.2}, overlap {:.2}) model={}",
                grounding.is_grounded,
                grounding.confidence,
                grounding.reference_score,
                grounding.overlap_score,
                model
            );
            if !grounding.matched_markers.is_empty() {
                println!("markers: {}", grounding.matched_markers.join(", "));
            }
            println!("sources:");
            for s in &sources {
                println!("  - {} [{}] {:.2}", s.title, s.document_id, s.score);
            }
        }
    }
    Ok(())
}

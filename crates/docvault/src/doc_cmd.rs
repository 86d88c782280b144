//! `dv upload`, `dv status`, `dv retry`.
//!
//! Uploads run their pipelines as parallel tokio tasks and the command
//! waits for all of them. Pipelines report into a per-owner progress hub
//! that is relayed to stderr; the one-line summary per document goes to
//! stdout.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use docvault_core::models::{Classification, DocumentStatus};

use crate::config::Config;
use crate::ingest::{self, RunOutcome, UploadRequest};
use crate::progress::{self, ChannelProgress, ProgressMode};
use crate::vault::Vault;

pub struct UploadArgs {
    pub paths: Vec<PathBuf>,
    pub owner: String,
    pub classification: String,
    pub title: Option<String>,
    pub external_id: Option<String>,
    pub progress: ProgressMode,
}

pub async fn run_upload(config: &Config, args: UploadArgs) -> Result<()> {
    if args.paths.is_empty() {
        bail!("no files given");
    }
    if args.paths.len() > 1 && (args.title.is_some() || args.external_id.is_some()) {
        bail!("--title and --external-id apply to a single file");
    }
    let classification: Classification = args.classification.parse()?;

    let vault = Vault::open(config).await?;
    let hub = Arc::new(ChannelProgress::new());
    let relay = progress::relay(&hub, &args.owner, args.progress.reporter());
    let pipeline = vault.pipeline(hub);

    let mut runs = Vec::new();
    for path in &args.paths {
        let req = UploadRequest {
            path: path.clone(),
            owner_id: args.owner.clone(),
            classification,
            title: args.title.clone(),
            external_id: args.external_id.clone(),
        };
        let doc = ingest::upload(vault.store.as_ref(), &config.storage.dir, &req).await?;
        let same_bytes = vault.store.documents_with_hash(&doc.file_hash).await?;
        if same_bytes.len() > 1 {
            info!(
                document_id = %doc.id,
                copies = same_bytes.len(),
                "identical content already uploaded"
            );
        }
        runs.push((doc.id.clone(), path.clone(), pipeline.spawn(&doc.id)));
    }

    let mut failed = 0;
    for (id, path, handle) in runs {
        let outcome = handle
            .await
            .with_context(|| format!("pipeline task for {} panicked", path.display()))??;
        if outcome.status() == DocumentStatus::Failed {
            failed += 1;
        }
        print_outcome(&id, &path.display().to_string(), &outcome);
    }
    drop(pipeline);
    relay.await.context("progress relay panicked")?;
    vault.close().await;

    if failed > 0 {
        bail!("{} of {} upload(s) failed", failed, args.paths.len());
    }
    Ok(())
}

fn print_outcome(id: &str, label: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Finished { status, error, .. } => match error {
            Some(e) => println!("{}  {:<18} {}  ({})", id, status.as_str(), label, e),
            None => println!("{}  {:<18} {}", id, status.as_str(), label),
        },
        RunOutcome::NotClaimed { current } => {
            println!("{}  {:<18} {}  (already processed)", id, current.as_str(), label)
        }
    }
}

pub async fn run_status(config: &Config, id: &str, json: bool) -> Result<()> {
    let vault = Vault::open(config).await?;
    let doc = vault
        .store
        .find_document(id)
        .await?
        .with_context(|| format!("Document not found: {}", id))?;
    let report = ingest::status(vault.store.as_ref(), &doc.id)
        .await?
        .with_context(|| format!("Document not found: {}", id))?;
    vault.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let d = &report.document;
    println!("--- Document ---");
    println!("id:          {}", d.id);
    println!("external_id: {}", d.external_id);
    println!("title:       {}", doc.display_title());
    println!("owner:       {}", doc.owner_id);
    println!("class:       {}", doc.classification);
    println!("format:      {} ({} bytes)", doc.mime_class, doc.size_bytes);
    println!("status:      {}", d.status);
    println!("virus_scan:  {}", d.virus_scan_status.as_str());
    println!(
        "keyword_ref: {}",
        d.keyword_index_ref.as_deref().unwrap_or("-")
    );
    println!(
        "vector_ref:  {}",
        d.vector_index_ref.as_deref().unwrap_or("-")
    );
    if let Some(err) = &d.error_message {
        println!("error:       {}", err);
    }
    println!();
    println!("--- Steps ---");
    for step in &report.steps {
        print!(
            "{:<14} {:<9} {:>3}%  {}",
            step.step.as_str(),
            step.status.as_str(),
            step.progress,
            step.message
        );
        match &step.error_message {
            Some(e) => println!(" ({})", e),
            None => println!(),
        }
    }
    Ok(())
}

/// Reset a failed document and run the pipeline again, waiting for it.
pub async fn run_retry(config: &Config, id: &str, progress: ProgressMode) -> Result<()> {
    let vault = Vault::open(config).await?;
    let doc = vault
        .store
        .find_document(id)
        .await?
        .with_context(|| format!("Document not found: {}", id))?;

    let hub = Arc::new(ChannelProgress::new());
    let relay = progress::relay(&hub, &doc.owner_id, progress.reporter());
    let pipeline = vault.pipeline(hub);
    let run_id = pipeline.reset_for_retry(&doc.id).await?;
    println!("retry run {}", run_id);
    let outcome = pipeline.run_as(&doc.id, &run_id).await;
    drop(pipeline);
    relay.await.context("progress relay panicked")?;
    let outcome = outcome?;
    vault.close().await;

    print_outcome(&doc.id, &doc.filename, &outcome);
    if outcome.status() == DocumentStatus::Failed {
        bail!("retry failed");
    }
    Ok(())
}

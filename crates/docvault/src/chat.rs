//! Chat turn orchestration.
//!
//! ```text
//! message ─▶ HybridSearcher ─▶ allocate ─▶ precheck ─▶ AnswerGenerator ─▶ verify
//!             (scoped)          (budget)    (≥ N)      (under timeout)
//! ```
//!
//! [`ChatService::prepare_turn`] always returns the candidates and the
//! allocated prompt, so `dv context` can show what would be sent.
//! [`ChatService::answer`] refuses to call the generator when too few
//! sources were found and reports that as an outcome, not an error.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use docvault_core::context::{allocate, Allocation, AllocationInput, AllocatorConfig};
use docvault_core::grounding::{self, GroundingConfig, GroundingReport};
use docvault_core::models::{ChatTurn, RetrievedCandidate};
use docvault_core::search::HybridSearcher;

use crate::traits::AnswerGenerator;

pub struct TurnRequest<'a> {
    pub principal_id: &'a str,
    pub message: &'a str,
    pub explicit_selection: Option<&'a [String]>,
    pub history: &'a [ChatTurn],
}

#[derive(Debug, Clone, Serialize)]
pub struct PreparedTurn {
    pub candidates: Vec<RetrievedCandidate>,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered {
        answer: String,
        model: String,
        grounding: GroundingReport,
        sources: Vec<RetrievedCandidate>,
    },
    /// Generation was skipped.
    InsufficientContext {
        message: String,
        sources: Vec<RetrievedCandidate>,
    },
}

pub struct ChatService {
    searcher: Arc<HybridSearcher>,
    generator: Arc<dyn AnswerGenerator>,
    allocator: AllocatorConfig,
    grounding: GroundingConfig,
    final_limit: usize,
    generate_timeout: Duration,
}

impl ChatService {
    pub fn new(
        searcher: Arc<HybridSearcher>,
        generator: Arc<dyn AnswerGenerator>,
        allocator: AllocatorConfig,
        grounding: GroundingConfig,
        final_limit: usize,
        generate_timeout: Duration,
    ) -> Self {
        Self {
            searcher,
            generator,
            allocator,
            grounding,
            final_limit,
            generate_timeout,
        }
    }

    /// Retrieve in scope and pack the prompt.
    pub async fn prepare_turn(&self, req: &TurnRequest<'_>) -> Result<PreparedTurn> {
        let scope = self
            .searcher
            .resolve_scope(req.principal_id, req.explicit_selection)
            .await?;
        let candidates = if req.message.trim().is_empty() {
            Vec::new()
        } else {
            self.searcher
                .search_in_scope(req.message, &scope, self.final_limit)
                .await
        };

        let stats = corpus_stats(scope.ids.len(), &candidates);
        let allocation = allocate(
            &AllocationInput {
                user_message: req.message,
                candidates: &candidates,
                history: req.history,
                corpus_stats: Some(&stats),
            },
            &self.allocator,
        );
        info!(
            principal_id = req.principal_id,
            scope = scope.ids.len(),
            candidates = candidates.len(),
            tokens_used = allocation.metadata.tokens_used,
            "turn prepared"
        );
        Ok(PreparedTurn {
            candidates,
            allocation,
        })
    }

    /// Prepare, generate, verify.
    pub async fn answer(&self, req: &TurnRequest<'_>) -> Result<TurnOutcome> {
        let prepared = self.prepare_turn(req).await?;
        if let Err(e) = grounding::precheck(&prepared.candidates, &self.grounding) {
            info!(principal_id = req.principal_id, "generation skipped: {}", e);
            return Ok(TurnOutcome::InsufficientContext {
                message: e.to_string(),
                sources: prepared.candidates,
            });
        }

        let answer = tokio::time::timeout(
            self.generate_timeout,
            self.generator.generate(&prepared.allocation.prompt),
        )
        .await
        .map_err(|_| {
            warn!(model = self.generator.model_name(), "answer generation timed out");
            anyhow::anyhow!(
                "answer generation timed out after {}s",
                self.generate_timeout.as_secs()
            )
        })?
        .with_context(|| format!("generator {} failed", self.generator.model_name()))?;

        let report = grounding::verify(
            &answer,
            &prepared.candidates,
            &prepared.allocation.prompt,
            &self.grounding,
        );
        if !report.is_grounded {
            warn!(confidence = report.confidence, "answer is not grounded");
        }
        Ok(TurnOutcome::Answered {
            answer,
            model: self.generator.model_name().to_string(),
            grounding: report,
            sources: prepared.candidates,
        })
    }
}

fn corpus_stats(in_scope: usize, candidates: &[RetrievedCandidate]) -> String {
    format!(
        "{} document(s) accessible; {} matched this question.",
        in_scope,
        candidates.len()
    )
}

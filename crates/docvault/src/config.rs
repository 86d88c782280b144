//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` and `[storage]` is optional; missing fields
//! fall back to the `default_*` functions below. [`load_config`] rejects
//! values the pipeline and retrieval engine cannot work with.
//!
//! ```toml
//! [db]
//! path = "./data/dv.sqlite"
//!
//! [storage]
//! dir = "./data/files"
//!
//! [scan]
//! mode = "clamd"            # or "disabled"
//! address = "127.0.0.1:3310"
//! policy = "fail_open"      # or "fail_closed"
//!
//! [ingest.timeouts.extract]
//! base_secs = 15
//! per_mb_secs = 4
//!
//! [embedding]
//! provider = "hash"         # disabled | hash | openai | ollama
//! dims = 256
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docvault_core::context::AllocatorConfig;
use docvault_core::grounding::GroundingConfig;
use docvault_core::search::RetrievalParams;
use docvault_core::timeouts::TimeoutConfig;

use crate::scanner::ScanPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub grounding: GroundingSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Where uploaded bytes are kept, content-addressed by SHA-256.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_scan_mode")]
    pub mode: String,
    #[serde(default = "default_clamd_address")]
    pub address: String,
    #[serde(default)]
    pub policy: ScanPolicy,
    /// Bytes per INSTREAM chunk.
    #[serde(default = "default_scan_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: default_scan_mode(),
            address: default_clamd_address(),
            policy: ScanPolicy::default(),
            chunk_bytes: default_scan_chunk_bytes(),
        }
    }
}

fn default_scan_mode() -> String {
    "disabled".to_string()
}
fn default_clamd_address() -> String {
    "127.0.0.1:3310".to_string()
}
fn default_scan_chunk_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Chunk size used by both index writers.
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: default_chunk_max_tokens(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

fn default_chunk_max_tokens() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_weight(),
            vector_weight: default_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            final_limit: default_final_limit(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            keyword_weight: self.keyword_weight,
            vector_weight: self.vector_weight,
            candidate_multiplier: self.candidate_multiplier,
        }
    }
}

fn default_weight() -> f64 {
    0.5
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_final_limit() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_true")]
    pub balanced: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            history_turns: default_history_turns(),
            balanced: true,
        }
    }
}

impl ContextConfig {
    pub fn allocator(&self) -> AllocatorConfig {
        AllocatorConfig {
            budget_tokens: self.budget_tokens,
            history_turns: self.history_turns,
            balanced: self.balanced,
        }
    }
}

fn default_budget_tokens() -> usize {
    4000
}
fn default_history_turns() -> usize {
    6
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundingSection {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,
}

impl Default for GroundingSection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_candidates: default_min_candidates(),
        }
    }
}

impl GroundingSection {
    pub fn verifier(&self) -> GroundingConfig {
        GroundingConfig {
            threshold: self.threshold,
            min_candidates: self.min_candidates,
        }
    }
}

fn default_threshold() -> f64 {
    0.7
}
fn default_min_candidates() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Answer generator (OpenAI-compatible chat completions).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: default_llm_url(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f64 {
    0.2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        bail!("db.max_connections must be >= 1");
    }

    match config.scan.mode.as_str() {
        "disabled" | "clamd" => {}
        other => bail!(
            "Unknown scan mode: '{}'. Must be disabled or clamd.",
            other
        ),
    }
    if config.scan.chunk_bytes == 0 {
        bail!("scan.chunk_bytes must be > 0");
    }

    if config.ingest.chunk_max_tokens == 0 {
        bail!("ingest.chunk_max_tokens must be > 0");
    }
    let t = &config.ingest.timeouts;
    if t.soft_ceiling_secs <= 0.0 || t.hard_ceiling_secs < t.soft_ceiling_secs {
        bail!("ingest.timeouts: need 0 < soft_ceiling_secs <= hard_ceiling_secs");
    }
    if t.plain_hard_factor < 1.0 || t.rich_hard_factor < 1.0 {
        bail!("ingest.timeouts: hard factors must be >= 1.0");
    }

    let r = &config.retrieval;
    if r.keyword_weight < 0.0 || r.vector_weight < 0.0 {
        bail!("retrieval weights must be >= 0.0");
    }
    if r.keyword_weight + r.vector_weight <= 0.0 {
        bail!("retrieval.keyword_weight + retrieval.vector_weight must be > 0.0");
    }
    if r.candidate_multiplier == 0 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if r.final_limit == 0 {
        bail!("retrieval.final_limit must be >= 1");
    }

    if config.context.budget_tokens == 0 {
        bail!("context.budget_tokens must be > 0");
    }

    if !(0.0..=1.0).contains(&config.grounding.threshold) {
        bail!("grounding.threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "hash" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

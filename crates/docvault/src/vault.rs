//! Service wiring: one SQLite pool shared by the document store and both
//! index backends, plus factories for the pipeline, searcher, and chat
//! service.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use docvault_core::search::HybridSearcher;
use docvault_core::store::{DocumentStore, IndexBackend};

use crate::chat::ChatService;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::extract::FileExtractor;
use crate::index::{SqliteKeywordIndex, SqliteVectorIndex};
use crate::ingest::{Pipeline, Services};
use crate::llm;
use crate::progress::ProgressReporter;
use crate::scanner;
use crate::sqlite_store::SqliteStore;

pub struct Vault {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub keyword: Arc<dyn IndexBackend>,
    pub vector: Arc<dyn IndexBackend>,
}

impl Vault {
    /// Connect to the database named in `config`. Migrations are not run;
    /// that is `dv init`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let provider = embedding::create_provider(&config.embedding)?;
        let max_tokens = config.ingest.chunk_max_tokens;
        Ok(Self {
            config: config.clone(),
            store: Arc::new(SqliteStore::new(pool.clone())),
            keyword: Arc::new(SqliteKeywordIndex::new(pool.clone(), max_tokens)),
            vector: Arc::new(SqliteVectorIndex::new(pool, provider, max_tokens)),
        })
    }

    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn pipeline(&self, progress: Arc<dyn ProgressReporter>) -> Pipeline {
        let services = Services {
            documents: self.documents(),
            scanner: scanner::create_scanner(&self.config.scan),
            extractor: Arc::new(FileExtractor),
            keyword: self.keyword.clone(),
            vector: self.vector.clone(),
            progress,
        };
        Pipeline::new(
            services,
            self.config.ingest.timeouts.clone(),
            self.config.scan.policy,
        )
    }

    pub fn searcher(&self) -> HybridSearcher {
        HybridSearcher::new(
            self.documents(),
            self.store.clone(),
            self.keyword.clone(),
            self.vector.clone(),
            self.config.retrieval.params(),
        )
    }

    pub fn chat(&self) -> Result<ChatService> {
        Ok(ChatService::new(
            Arc::new(self.searcher()),
            llm::create_generator(&self.config.llm)?,
            self.config.context.allocator(),
            self.config.grounding.verifier(),
            self.config.retrieval.final_limit,
            Duration::from_secs(self.config.llm.timeout_secs),
        ))
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}

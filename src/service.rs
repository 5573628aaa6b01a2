//! Wiring between configuration and the core review pipeline.
//!
//! [`ReviewService`] owns everything a review needs (store, providers,
//! pipeline) and is shared by the CLI `check` command and the HTTP server.

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, Instrument};

use task_review_core::pipeline::failed_result;
use task_review_core::{
    ChunkStore, DecisionGenerator, EmbeddingProvider, LanguageModel, ReviewError, ReviewPipeline,
    ReviewResult, Retriever,
};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::http::REQUEST_PATH_RETRIES;
use crate::llm::create_model;
use crate::server::{validate_request, ReviewRequest};
use crate::sqlite_store::SqliteStore;

/// Index status reported by `GET /health` and `review health`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Health {
    pub status: &'static str,
    pub chunks: i64,
    pub model: String,
    pub embedding_dim: usize,
}

pub struct ReviewService {
    pipeline: Arc<ReviewPipeline>,
    store: Arc<dyn ChunkStore>,
    embedding_model: String,
    embedding_dim: usize,
}

impl ReviewService {
    /// Open the database and build providers from `config`. Provider calls
    /// made during a review are never retried.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store: Arc<dyn ChunkStore> = Arc::new(SqliteStore::new(pool));
        let embedder = create_provider(&config.embedding, REQUEST_PATH_RETRIES)?;
        let model = create_model(&config.llm)?;
        Ok(Self::new(config, store, embedder, model))
    }

    /// Build a service from already-constructed components.
    pub fn new(
        config: &Config,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let embedding_model = embedder.model_name().to_string();
        let embedding_dim = embedder.dims();
        let retriever = Retriever::new(embedder, store.clone(), config.retrieval_params());
        let generator = DecisionGenerator::new(model, config.generation_params());
        let pipeline = ReviewPipeline::new(retriever, generator, config.gate_policy());
        Self {
            pipeline: Arc::new(pipeline),
            store,
            embedding_model,
            embedding_dim,
        }
    }

    /// Run one review on its own task.
    ///
    /// A panic inside the pipeline is reported as a failed result instead of
    /// tearing down the caller.
    pub async fn review(&self, task_id: &str, details: &str) -> ReviewResult {
        let started = Instant::now();
        let pipeline = self.pipeline.clone();
        let (id, text) = (task_id.to_string(), details.to_string());

        let task = async move { pipeline.process_review(&id, &text).await };

        match tokio::spawn(task.in_current_span()).await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id, error = %e, "review task aborted");
                failed_result(
                    task_id,
                    &ReviewError::Infrastructure("review task panicked".to_string()),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Fails when the store is unreachable or holds no chunks for the
    /// configured embedding space.
    pub async fn health(&self) -> Result<Health> {
        let chunks = self
            .store
            .count_chunks(&self.embedding_model, self.embedding_dim)
            .await?;
        if chunks == 0 {
            bail!(
                "no chunks indexed for model {} ({} dims); run `review ingest`",
                self.embedding_model,
                self.embedding_dim
            );
        }
        Ok(Health {
            status: "ok",
            chunks,
            model: self.embedding_model.clone(),
            embedding_dim: self.embedding_dim,
        })
    }
}

/// `review check`: run one review and print the result as JSON.
pub async fn run_check(config: &Config, task_id: &str, details: &str) -> Result<()> {
    let request = ReviewRequest {
        task_id: task_id.to_string(),
        details: details.to_string(),
    };
    let (task_id, details) = validate_request(&request).map_err(|e| anyhow!(e))?;

    let service = ReviewService::from_config(config).await?;
    let result = service.review(task_id, details).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `review health`: print index status, failing when nothing is indexed.
pub async fn run_health(config: &Config) -> Result<()> {
    let service = ReviewService::from_config(config).await?;
    let health = service.health().await?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::http::test_support::failing_server;
    use std::sync::atomic::Ordering;
    use async_trait::async_trait;
    use task_review_core::decision::GenerationRequest;
    use task_review_core::embedding::EmbedMode;
    use task_review_core::models::{NewChunk, NewDocument, Outcome, Stage};
    use task_review_core::store::memory::InMemoryChunkStore;

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct PanickingModel;

    #[async_trait]
    impl LanguageModel for PanickingModel {
        fn model_name(&self) -> &str {
            "panics"
        }
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            panic!("model exploded")
        }
    }

    fn config() -> Config {
        parse_config("[db]\npath = \"./unused.sqlite\"\n").unwrap()
    }

    async fn seeded_store() -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::new());
        let doc = store
            .upsert_document(&NewDocument {
                filename: "policy.md".into(),
                file_path: "/data/policy.md".into(),
                file_size: 10,
                file_hash: "h".into(),
                total_pages: Some(1),
            })
            .await
            .unwrap();
        for text in ["Flights need approval.", "Hotels are capped."] {
            store
                .insert_chunk(&NewChunk {
                    document_id: doc,
                    page_start: Some(1),
                    page_end: Some(1),
                    title: None,
                    section: None,
                    text: text.to_string(),
                    embedding: vec![1.0, 0.0],
                    model: "axis".into(),
                    dims: 2,
                    task_type: "RETRIEVAL_DOCUMENT".into(),
                    sha256: task_review_core::chunk::content_hash(text),
                    ingested_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_panicking_review_reports_failure() {
        let service = ReviewService::new(
            &config(),
            seeded_store().await,
            Arc::new(AxisEmbedder),
            Arc::new(PanickingModel),
        );
        let result = service.review("T-1", "Book a flight").await;
        assert_eq!(result.stage, Stage::Failed);
        assert_eq!(result.decision, Outcome::Reject);
        assert_eq!(result.task_id, "T-1");
        assert_eq!(result.required_actions[0].action, "retry_request");
    }

    #[tokio::test]
    async fn test_health_counts_configured_space() {
        let service = ReviewService::new(
            &config(),
            seeded_store().await,
            Arc::new(AxisEmbedder),
            Arc::new(PanickingModel),
        );
        let health = service.health().await.unwrap();
        assert_eq!(health.chunks, 2);
        assert_eq!(health.model, "axis");
        assert_eq!(health.embedding_dim, 2);
    }

    #[tokio::test]
    async fn test_configured_review_sends_query_once() {
        let (url, hits) = failing_server().await;
        let tmp = tempfile::TempDir::new().unwrap();
        let config = parse_config(&format!(
            "[db]\npath = \"{}\"\n\n[embedding]\nprovider = \"ollama\"\n\
             model = \"nomic-embed-text\"\ndims = 768\nurl = \"{}\"\n",
            tmp.path().join("review.sqlite").display(),
            url
        ))
        .unwrap();
        let service = ReviewService::from_config(&config).await.unwrap();

        let result = service.review("T-9", "Book a flight").await;

        assert_eq!(result.stage, Stage::CoverageRejected);
        assert_eq!(result.coverage, 0.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_fails_on_empty_index() {
        let service = ReviewService::new(
            &config(),
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(AxisEmbedder),
            Arc::new(PanickingModel),
        );
        assert!(service.health().await.is_err());
    }
}

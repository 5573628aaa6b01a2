//! Evidence retrieval for a task description.
//!
//! The [`Retriever`] embeds the task as a query, asks the [`ChunkStore`] for
//! the nearest chunks inside the configured embedding space, and turns the
//! rows into a [`RetrievalReport`]:
//!
//! 1. Truncate each chunk's text to `max_passage_chars` characters.
//! 2. Tag each passage `doc:<document_id>#chunk:<chunk_id>`.
//! 3. Coverage = mean similarity, rounded to 3 decimals (0.0 with no rows).
//!
//! Retrieval never fails from the caller's point of view: any embedding or
//! store error yields an empty report, which the coverage gate rejects.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::embedding::{embed_one, EmbedMode, EmbeddingProvider};
use crate::models::{chunk_tag, ChunkMatch, RetrievalReport};
use crate::store::ChunkStore;

pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MAX_PASSAGE_CHARS: usize = 1500;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub max_passage_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            store,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Gather evidence for `task_details`. Never fails; see module docs.
    pub async fn retrieve(&self, task_details: &str) -> RetrievalReport {
        if task_details.trim().is_empty() {
            warn!("retrieval skipped: empty task details");
            return RetrievalReport::empty();
        }

        match self.search(task_details).await {
            Ok(rows) => {
                let report = build_report(rows, self.params.max_passage_chars);
                debug!(
                    passages = report.passages.len(),
                    coverage = report.coverage,
                    "retrieval complete"
                );
                report
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "retrieval failed, continuing with no evidence");
                RetrievalReport::empty()
            }
        }
    }

    async fn search(&self, task_details: &str) -> Result<Vec<ChunkMatch>> {
        let query_vec = embed_one(self.embedder.as_ref(), task_details, EmbedMode::Query).await?;
        self.store
            .nearest_chunks(
                &query_vec,
                self.embedder.model_name(),
                self.embedder.dims(),
                self.params.top_k,
            )
            .await
    }
}

/// Turn store rows into a report. Rows with empty text or a non-finite
/// similarity are skipped.
pub fn build_report(rows: Vec<ChunkMatch>, max_passage_chars: usize) -> RetrievalReport {
    let mut report = RetrievalReport::empty();
    let mut similarities = Vec::with_capacity(rows.len());

    for row in rows {
        if !row.similarity.is_finite() {
            warn!(chunk_id = row.chunk_id, "skipping row with non-finite similarity");
            continue;
        }
        if row.text.is_empty() {
            warn!(chunk_id = row.chunk_id, "skipping row with empty text");
            continue;
        }

        report
            .passages
            .push(truncate_chars(&row.text, max_passage_chars).to_string());
        report.tags.push(chunk_tag(row.document_id, row.chunk_id));
        if !report.doc_ids.contains(&row.document_id) {
            report.doc_ids.push(row.document_id);
        }
        similarities.push(row.similarity);
    }

    report.coverage = coverage_score(&similarities);
    report
}

/// Mean similarity rounded to 3 decimals and clamped to `[0, 1]`.
pub fn coverage_score(similarities: &[f64]) -> f64 {
    if similarities.is_empty() {
        return 0.0;
    }
    let mean = similarities.iter().sum::<f64>() / similarities.len() as f64;
    round3(mean).clamp(0.0, 1.0)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Hard-cut `text` to at most `max_chars` characters (not bytes).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

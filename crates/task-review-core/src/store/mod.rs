//! Storage abstraction for policy chunks.
//!
//! The [`ChunkStore`] trait covers the single read the review pipeline needs
//! (nearest-neighbor search restricted to one embedding space) plus the
//! writes and counts used by ingestion and health checks.
//!
//! Implementations must be `Send + Sync` and safe to share across
//! concurrently running reviews.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkMatch, DocumentStatus, NewChunk, NewDocument};

/// Abstract chunk storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`nearest_chunks`](ChunkStore::nearest_chunks) | Top-K cosine search within one (model, dims) space |
/// | [`count_chunks`](ChunkStore::count_chunks) | Rows visible to a (model, dims) space |
/// | [`contains_hash`](ChunkStore::contains_hash) | Dedup check by content hash |
/// | [`upsert_document`](ChunkStore::upsert_document) | Register a source document |
/// | [`insert_chunk`](ChunkStore::insert_chunk) | Persist one embedded chunk |
/// | [`finish_document`](ChunkStore::finish_document) | Record document status and chunk count |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Return at most `k` chunks whose stored model and dimensionality equal
    /// `model` and `dims`, ordered by descending cosine similarity.
    async fn nearest_chunks(
        &self,
        query_vec: &[f32],
        model: &str,
        dims: usize,
        k: usize,
    ) -> Result<Vec<ChunkMatch>>;

    async fn count_chunks(&self, model: &str, dims: usize) -> Result<i64>;

    async fn contains_hash(&self, sha256: &str) -> Result<bool>;

    /// Insert or refresh a document by file name, returning its id.
    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64>;

    /// Insert a chunk, returning its id.
    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<i64>;

    async fn finish_document(
        &self,
        document_id: i64,
        status: DocumentStatus,
        total_chunks: i64,
    ) -> Result<()>;
}

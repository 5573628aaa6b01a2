//! In-memory [`ChunkStore`] implementation for tests and embedding.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every stored chunk in the requested space.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ChunkMatch, DocumentStatus, NewChunk, NewDocument};

use super::ChunkStore;

struct StoredDocument {
    id: i64,
    filename: String,
    status: DocumentStatus,
    total_chunks: i64,
}

struct StoredChunk {
    id: i64,
    chunk: NewChunk,
}

/// In-memory chunk store.
pub struct InMemoryChunkStore {
    documents: RwLock<Vec<StoredDocument>>,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Status of a registered document, if any.
    pub fn document_status(&self, document_id: i64) -> Option<(DocumentStatus, i64)> {
        let docs = self.documents.read().ok()?;
        docs.iter()
            .find(|d| d.id == document_id)
            .map(|d| (d.status, d.total_chunks))
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn nearest_chunks(
        &self,
        query_vec: &[f32],
        model: &str,
        dims: usize,
        k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut matches: Vec<ChunkMatch> = chunks
            .iter()
            .filter(|sc| sc.chunk.model == model && sc.chunk.dims == dims)
            .filter(|sc| sc.chunk.embedding.len() == dims)
            .map(|sc| ChunkMatch {
                chunk_id: sc.id,
                document_id: sc.chunk.document_id,
                text: sc.chunk.text.clone(),
                similarity: cosine_similarity(query_vec, &sc.chunk.embedding) as f64,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn count_chunks(&self, model: &str, dims: usize) -> Result<i64> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks
            .iter()
            .filter(|sc| sc.chunk.model == model && sc.chunk.dims == dims)
            .count() as i64)
    }

    async fn contains_hash(&self, sha256: &str) -> Result<bool> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.iter().any(|sc| sc.chunk.sha256 == sha256))
    }

    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        if let Some(existing) = docs.iter_mut().find(|d| d.filename == doc.filename) {
            existing.status = DocumentStatus::Processing;
            return Ok(existing.id);
        }
        let id = docs.len() as i64 + 1;
        docs.push(StoredDocument {
            id,
            filename: doc.filename.clone(),
            status: DocumentStatus::Processing,
            total_chunks: 0,
        });
        Ok(id)
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<i64> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        if chunks.iter().any(|sc| sc.chunk.sha256 == chunk.sha256) {
            bail!("chunk with sha256 {} already exists", chunk.sha256);
        }
        let id = chunks.len() as i64 + 1;
        chunks.push(StoredChunk {
            id,
            chunk: chunk.clone(),
        });
        Ok(id)
    }

    async fn finish_document(
        &self,
        document_id: i64,
        status: DocumentStatus,
        total_chunks: i64,
    ) -> Result<()> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        let doc = docs
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;
        doc.status = status;
        doc.total_chunks = total_chunks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(doc: i64, text: &str, embedding: Vec<f32>, model: &str) -> NewChunk {
        NewChunk {
            document_id: doc,
            page_start: Some(1),
            page_end: Some(1),
            title: None,
            section: None,
            text: text.to_string(),
            dims: embedding.len(),
            embedding,
            model: model.to_string(),
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            sha256: format!("hash-{}", text),
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_nearest_orders_by_similarity() {
        let store = InMemoryChunkStore::new();
        store
            .insert_chunk(&chunk(1, "far", vec![0.0, 1.0], "m"))
            .await
            .unwrap();
        store
            .insert_chunk(&chunk(2, "near", vec![1.0, 0.1], "m"))
            .await
            .unwrap();

        let hits = store.nearest_chunks(&[1.0, 0.0], "m", 2, 4).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "near");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_nearest_filters_embedding_space() {
        let store = InMemoryChunkStore::new();
        store
            .insert_chunk(&chunk(1, "same model", vec![1.0, 0.0], "m"))
            .await
            .unwrap();
        store
            .insert_chunk(&chunk(1, "other model", vec![1.0, 0.0], "other"))
            .await
            .unwrap();
        store
            .insert_chunk(&chunk(1, "other dims", vec![1.0, 0.0, 0.0], "m"))
            .await
            .unwrap();

        let hits = store.nearest_chunks(&[1.0, 0.0], "m", 2, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "same model");
        assert_eq!(store.count_chunks("m", 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let store = InMemoryChunkStore::new();
        let c = chunk(1, "a", vec![1.0], "m");
        store.insert_chunk(&c).await.unwrap();
        assert!(store.contains_hash(&c.sha256).await.unwrap());
        assert!(store.insert_chunk(&c).await.is_err());
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = InMemoryChunkStore::new();
        let doc = NewDocument {
            filename: "policy.pdf".into(),
            file_path: "/data/policy.pdf".into(),
            file_size: 10,
            file_hash: "h".into(),
            total_pages: Some(2),
        };
        let id = store.upsert_document(&doc).await.unwrap();
        assert_eq!(store.upsert_document(&doc).await.unwrap(), id);
        store
            .finish_document(id, DocumentStatus::Completed, 7)
            .await
            .unwrap();
        assert_eq!(
            store.document_status(id),
            Some((DocumentStatus::Completed, 7))
        );
    }
}

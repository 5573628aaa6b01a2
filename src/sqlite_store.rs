//! SQLite-backed [`ChunkStore`] implementation.
//!
//! Embeddings are stored as little-endian `f32` BLOBs next to the chunk
//! text. Nearest-neighbor search loads the rows of one `(model, dim)` space
//! and ranks them by cosine similarity in Rust.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use task_review_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use task_review_core::models::{ChunkMatch, DocumentStatus, NewChunk, NewDocument};
use task_review_core::store::ChunkStore;

/// SQLite implementation of the [`ChunkStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

type MatchRow = (i64, i64, String, Vec<u8>);

fn decode_match_row(row: &SqliteRow) -> Result<MatchRow, sqlx::Error> {
    Ok((
        row.try_get("id")?,
        row.try_get("document_id")?,
        row.try_get("text")?,
        row.try_get("embedding")?,
    ))
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn nearest_chunks(
        &self,
        query_vec: &[f32],
        model: &str,
        dims: usize,
        k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let rows = sqlx::query(
            "SELECT id, document_id, text, embedding FROM chunks WHERE model = ? AND dim = ?",
        )
        .bind(model)
        .bind(dims as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let (chunk_id, document_id, text, blob) = match decode_match_row(row) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable chunk row");
                    continue;
                }
            };
            if blob.len() != dims * 4 {
                warn!(
                    chunk_id,
                    bytes = blob.len(),
                    dims,
                    "skipping chunk with mismatched embedding"
                );
                continue;
            }
            let vec = blob_to_vec(&blob);
            matches.push(ChunkMatch {
                chunk_id,
                document_id,
                text,
                similarity: cosine_similarity(query_vec, &vec) as f64,
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn count_chunks(&self, model: &str, dims: usize) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE model = ? AND dim = ?")
                .bind(model)
                .bind(dims as i64)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn contains_hash(&self, sha256: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE sha256 = ?")
                .bind(sha256)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (filename, file_path, file_size, file_hash, total_pages,
                                   processing_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'processing', ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                file_hash = excluded.file_hash,
                total_pages = excluded.total_pages,
                processing_status = 'processing',
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&doc.filename)
        .bind(&doc.file_path)
        .bind(doc.file_size)
        .bind(&doc.file_hash)
        .bind(doc.total_pages)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_chunk(&self, chunk: &NewChunk) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chunks (document_id, page_start, page_end, title, section, text,
                                embedding, model, dim, task_type, sha256, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.document_id)
        .bind(chunk.page_start)
        .bind(chunk.page_end)
        .bind(&chunk.title)
        .bind(&chunk.section)
        .bind(&chunk.text)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(&chunk.model)
        .bind(chunk.dims as i64)
        .bind(&chunk.task_type)
        .bind(&chunk.sha256)
        .bind(chunk.ingested_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn finish_document(
        &self,
        document_id: i64,
        status: DocumentStatus,
        total_chunks: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET processing_status = ?, total_chunks = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(total_chunks)
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

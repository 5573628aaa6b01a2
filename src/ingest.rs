//! Ingestion of policy documents into the chunk store.
//!
//! Flow per file: extract pages → split into chunks → drop chunks whose
//! content hash is already stored → embed in document mode, `batch_size`
//! texts per provider call → insert. Per-file and per-chunk failures are
//! logged, counted and skipped; only setup errors abort the run. A batch
//! whose reply has the wrong number of vectors fails as a whole, and a
//! vector whose length differs from the provider's `dims()` fails alone.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use task_review_core::chunk::{chunk_title, content_hash, PageChunk, TextSplitter};
use task_review_core::embedding::{EmbedMode, EmbeddingProvider};
use task_review_core::models::{DocumentStatus, NewChunk, NewDocument};
use task_review_core::store::ChunkStore;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::extract::extract_pages;
use crate::migrate::apply_schema;
use crate::sqlite_store::SqliteStore;

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks_created: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failures: usize,
    pub duration: Duration,
}

pub async fn run_ingest(config: &Config, data_dir: Option<PathBuf>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!(
            "Embedding provider is disabled. Set [embedding] provider in config before ingesting."
        );
    }
    let root = data_dir.unwrap_or_else(|| config.ingest.data_dir.clone());
    let files = scan_data_dir(&root, &config.ingest)?;
    info!(root = %root.display(), files = files.len(), "starting ingestion");

    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);
    let provider = create_provider(&config.embedding, config.ingest.max_retries)?;

    let summary = ingest_files(&root, &files, &store, provider.as_ref(), &config.ingest).await?;

    println!("ingest {}", root.display());
    println!("  documents loaded: {}", summary.documents);
    println!("  chunks created: {}", summary.chunks_created);
    println!("  inserted: {}", summary.inserted);
    println!("  duplicates skipped: {}", summary.duplicates);
    println!("  failures: {}", summary.failures);
    println!("  duration: {:.1}s", summary.duration.as_secs_f64());
    println!("ok");

    store.pool().close().await;
    Ok(())
}

/// List files under `root` matching the include globs and none of the
/// exclude globs, sorted by path.
pub fn scan_data_dir(root: &Path, settings: &IngestConfig) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Data directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&settings.include_globs)?;
    let exclude_set = build_globset(&settings.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) || !include_set.is_match(relative) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Ingest `files` (paths under `root`) into `store`.
pub async fn ingest_files(
    root: &Path,
    files: &[PathBuf],
    store: &dyn ChunkStore,
    embedder: &dyn EmbeddingProvider,
    settings: &IngestConfig,
) -> Result<IngestSummary> {
    let started = Instant::now();
    let splitter = TextSplitter::new(settings.chunk_size, settings.chunk_overlap)?;
    let mut summary = IngestSummary::default();
    let mut seen = HashSet::new();
    let mut pacer = Pacer::new(Duration::from_millis(settings.embed_delay_ms));

    for path in files {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                summary.failures += 1;
                continue;
            }
        };
        let pages = match extract_pages(path) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping file");
                summary.failures += 1;
                continue;
            }
        };

        let relative = path.strip_prefix(root).unwrap_or(path);
        let doc = NewDocument {
            filename: relative.to_string_lossy().to_string(),
            file_path: path.display().to_string(),
            file_size: bytes.len() as i64,
            file_hash: format!("{:x}", Sha256::digest(&bytes)),
            total_pages: Some(pages.len() as i64),
        };
        let document_id = match store.upsert_document(&doc).await {
            Ok(id) => id,
            Err(e) => {
                warn!(file = %doc.filename, error = %e, "failed to register document");
                summary.failures += 1;
                continue;
            }
        };
        summary.documents += 1;

        let chunks = splitter.split_pages(&pages);
        summary.chunks_created += chunks.len();

        let mut fresh = Vec::new();
        let mut doc_duplicates = 0usize;
        let mut lookup_failures = 0usize;
        for chunk in chunks {
            let sha256 = content_hash(&chunk.text);
            let stored = match store.contains_hash(&sha256).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(file = %doc.filename, error = %e, "hash lookup failed");
                    lookup_failures += 1;
                    continue;
                }
            };
            if stored || !seen.insert(sha256.clone()) {
                doc_duplicates += 1;
                continue;
            }
            fresh.push((chunk, sha256));
        }

        let mut doc_inserted = 0usize;
        let mut doc_failures = lookup_failures;
        for batch in fresh.chunks(settings.batch_size.max(1)) {
            pacer.wait().await;
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let vectors = match embedder.embed(&texts, EmbedMode::Document).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    warn!(
                        file = %doc.filename,
                        chunks = batch.len(),
                        error = %e,
                        "embedding failed"
                    );
                    doc_failures += batch.len();
                    continue;
                }
            };

            if vectors.len() != batch.len() {
                warn!(
                    file = %doc.filename,
                    sent = batch.len(),
                    received = vectors.len(),
                    "embedding count mismatch, dropping batch"
                );
                doc_failures += batch.len();
                continue;
            }

            for ((chunk, sha256), vector) in batch.iter().zip(vectors) {
                if vector.len() != embedder.dims() {
                    warn!(
                        file = %doc.filename,
                        page = chunk.page,
                        expected = embedder.dims(),
                        got = vector.len(),
                        "embedding has wrong dimensionality"
                    );
                    doc_failures += 1;
                    continue;
                }
                let row = new_chunk(document_id, chunk, sha256, vector, embedder);
                match store.insert_chunk(&row).await {
                    Ok(_) => doc_inserted += 1,
                    Err(e) => {
                        warn!(file = %doc.filename, page = chunk.page, error = %e, "insert failed");
                        doc_failures += 1;
                    }
                }
            }
        }

        let status = if doc_failures > 0 {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Completed
        };
        store
            .finish_document(document_id, status, (doc_inserted + doc_duplicates) as i64)
            .await?;
        debug!(
            file = %doc.filename,
            inserted = doc_inserted,
            failures = doc_failures,
            "document done"
        );

        summary.inserted += doc_inserted;
        summary.duplicates += doc_duplicates;
        summary.failures += doc_failures;

        if settings.batch_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.batch_pause_ms)).await;
        }
    }

    summary.duration = started.elapsed();
    info!(
        documents = summary.documents,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        failures = summary.failures,
        "ingestion finished"
    );
    Ok(summary)
}

fn new_chunk(
    document_id: i64,
    chunk: &PageChunk,
    sha256: &str,
    embedding: Vec<f32>,
    embedder: &dyn EmbeddingProvider,
) -> NewChunk {
    NewChunk {
        document_id,
        page_start: Some(chunk.page as i64),
        page_end: Some(chunk.page as i64),
        title: chunk_title(&chunk.text),
        section: None,
        text: chunk.text.clone(),
        embedding,
        dims: embedder.dims(),
        model: embedder.model_name().to_string(),
        task_type: EmbedMode::Document.task_type().to_string(),
        sha256: sha256.to_string(),
        ingested_at: chrono::Utc::now(),
    }
}

/// Spaces out embedding calls by a fixed delay.
struct Pacer {
    delay: Duration,
    called: bool,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            called: false,
        }
    }

    async fn wait(&mut self) {
        if self.called && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.called = true;
    }
}

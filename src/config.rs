//! TOML configuration.
//!
//! The file is parsed once at startup by [`load_config`], validated
//! fail-fast, and then turned into the explicit parameter structs the core
//! components take at construction ([`RetrievalParams`], [`GatePolicy`],
//! [`GenerationParams`]). Nothing reads settings globally.
//!
//! API keys are never stored here; providers read `GEMINI_API_KEY` /
//! `OPENAI_API_KEY` from the environment when they are constructed.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use task_review_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use task_review_core::decision::{
    GenerationParams, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE,
};
use task_review_core::pipeline::{
    DEFAULT_APPROVAL_COVERAGE_MIN, DEFAULT_COVERAGE_THRESHOLD, DEFAULT_MIN_DISTINCT_CITATIONS,
};
use task_review_core::retrieval::{RetrievalParams, DEFAULT_MAX_PASSAGE_CHARS, DEFAULT_TOP_K};
use task_review_core::GatePolicy;

/// Embedding models with a fixed output dimensionality.
const KNOWN_MODEL_DIMS: [(&str, usize); 4] = [
    ("gemini-embedding-001", 768),
    ("text-embedding-004", 768),
    ("nomic-embed-text", 768),
    ("text-embedding-ada-002", 1536),
];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or a proxy for the hosted APIs).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model name used to tag and filter stored chunks.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("disabled")
    }

    pub fn dims(&self) -> usize {
        self.dims.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_passage_chars")]
    pub max_passage_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_passage_chars: default_max_passage_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewConfig {
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    #[serde(default = "default_approval_coverage_min")]
    pub approval_coverage_min: f64,
    #[serde(default = "default_min_distinct_citations")]
    pub min_distinct_citations: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: default_coverage_threshold(),
            approval_coverage_min: default_approval_coverage_min(),
            min_distinct_citations: default_min_distinct_citations(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Chunks embedded per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between embedding calls, in milliseconds.
    #[serde(default)]
    pub embed_delay_ms: u64,
    /// Pause after each document, in milliseconds.
    #[serde(default)]
    pub batch_pause_ms: u64,
    /// Retries for transient embedding errors during ingestion. Reviews
    /// never retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            embed_delay_ms: 0,
            batch_pause_ms: 0,
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_max_passage_chars() -> usize {
    DEFAULT_MAX_PASSAGE_CHARS
}
fn default_coverage_threshold() -> f64 {
    DEFAULT_COVERAGE_THRESHOLD
}
fn default_approval_coverage_min() -> f64 {
    DEFAULT_APPROVAL_COVERAGE_MIN
}
fn default_min_distinct_citations() -> usize {
    DEFAULT_MIN_DISTINCT_CITATIONS
}
fn default_max_context_chars() -> usize {
    DEFAULT_MAX_CONTEXT_CHARS
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_batch_size() -> usize {
    15
}
fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.retrieval.top_k,
            max_passage_chars: self.retrieval.max_passage_chars,
        }
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            coverage_threshold: self.review.coverage_threshold,
            approval_coverage_min: self.review.approval_coverage_min,
            min_distinct_citations: self.review.min_distinct_citations,
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_context_chars: self.review.max_context_chars,
            temperature: self.llm.temperature,
            max_output_tokens: self.llm.max_output_tokens,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        let model = match config.embedding.model.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            ),
        };
        let dims = match config.embedding.dims {
            Some(d) if d > 0 => d,
            _ => bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
        };
        if let Some((_, expected)) = KNOWN_MODEL_DIMS.iter().find(|(name, _)| *name == model) {
            if dims != *expected {
                bail!(
                    "embedding.dims = {} does not match model '{}' (expected {})",
                    dims,
                    model,
                    expected
                );
            }
        }
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_output_tokens == 0 {
        bail!("llm.max_output_tokens must be > 0");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_passage_chars == 0 {
        bail!("retrieval.max_passage_chars must be > 0");
    }

    // Review gates
    let review = &config.review;
    for (name, value) in [
        ("review.coverage_threshold", review.coverage_threshold),
        ("review.approval_coverage_min", review.approval_coverage_min),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if review.approval_coverage_min < review.coverage_threshold {
        bail!("review.approval_coverage_min must be >= review.coverage_threshold");
    }
    if review.min_distinct_citations == 0 {
        bail!("review.min_distinct_citations must be >= 1");
    }
    if review.max_context_chars == 0 {
        bail!("review.max_context_chars must be > 0");
    }

    // Ingest
    let ingest = &config.ingest;
    if ingest.chunk_size == 0 {
        bail!("ingest.chunk_size must be > 0");
    }
    if ingest.chunk_overlap >= ingest.chunk_size {
        bail!("ingest.chunk_overlap must be smaller than ingest.chunk_size");
    }
    if ingest.batch_size == 0 {
        bail!("ingest.batch_size must be >= 1");
    }

    Ok(())
}

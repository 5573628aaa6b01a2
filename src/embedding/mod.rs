//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`GeminiProvider`]**: Gemini `embedContent` / `batchEmbedContents`, with task types.
//! - **[`OpenAIProvider`]**: OpenAI `/v1/embeddings`.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! Use [`create_provider`] to pick one from configuration:
//!
//! ```rust,no_run
//! # use task_review::config::EmbeddingConfig;
//! # use task_review::embedding::create_provider;
//! # use task_review::http::REQUEST_PATH_RETRIES;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config, REQUEST_PATH_RETRIES).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! The caller picks the retry budget: ingestion passes
//! `[ingest].max_retries`, the review path sends each query once.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use task_review_core::embedding::{EmbedMode, EmbeddingProvider};

use crate::config::EmbeddingConfig;
use crate::http::{api_key, build_client, JsonPost};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Build the provider named by `config.provider`, retrying transient HTTP
/// errors up to `max_retries` times.
pub fn create_provider(
    config: &EmbeddingConfig,
    max_retries: u32,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(config, max_retries)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config, max_retries)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config, max_retries)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn parse_vector(value: &Value, what: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", what))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn check_count(vectors: &[Vec<f32>], expected: usize, what: &str) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "{} returned {} embeddings for {} inputs",
            what,
            vectors.len(),
            expected
        );
    }
    Ok(())
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Gemini Provider ============

/// Embedding provider using the Gemini API.
///
/// Queries and documents are embedded with the `RETRIEVAL_QUERY` and
/// `RETRIEVAL_DOCUMENT` task types; `outputDimensionality` pins the vector
/// size. Requires `GEMINI_API_KEY`.
pub struct GeminiProvider {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig, max_retries: u32) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "Gemini")?;
        Ok(Self {
            model,
            dims,
            api_key: api_key("GEMINI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            client: build_client(config.timeout_secs)?,
            timeout_secs: config.timeout_secs,
            max_retries,
        })
    }

    fn request(&self, text: &str, mode: EmbedMode) -> Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": mode.task_type(),
            "outputDimensionality": self.dims,
        })
    }

    fn post(&self, method: &str) -> JsonPost<'_> {
        JsonPost {
            client: &self.client,
            url: format!(
                "{}/v1beta/models/{}:{}",
                self.base_url.trim_end_matches('/'),
                self.model,
                method
            ),
            headers: vec![("x-goog-api-key", self.api_key.clone())],
            operation: "Gemini embeddings",
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = if texts.len() == 1 {
            let json = self.post("embedContent").send(&self.request(&texts[0], mode)).await?;
            vec![parse_gemini_single(&json)?]
        } else {
            let requests: Vec<Value> = texts.iter().map(|t| self.request(t, mode)).collect();
            let json = self
                .post("batchEmbedContents")
                .send(&json!({ "requests": requests }))
                .await?;
            parse_gemini_batch(&json)?
        };
        check_count(&vectors, texts.len(), "Gemini")?;
        Ok(vectors)
    }
}

fn parse_gemini_single(json: &Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.get("values"))
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing embedding.values"))?;
    parse_vector(values, "Gemini")
}

fn parse_gemini_batch(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing embeddings array"))?
        .iter()
        .map(|item| {
            let values = item
                .get("values")
                .ok_or_else(|| anyhow!("Invalid Gemini response: missing values"))?;
            parse_vector(values, "Gemini")
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API. The embed mode is ignored.
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, max_retries: u32) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "OpenAI")?;
        Ok(Self {
            model,
            dims,
            api_key: api_key("OPENAI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            client: build_client(config.timeout_secs)?,
            timeout_secs: config.timeout_secs,
            max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a custom output size.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = json!(self.dims);
        }

        let json = JsonPost {
            client: &self.client,
            url: format!("{}/v1/embeddings", self.base_url.trim_end_matches('/')),
            headers: vec![("Authorization", format!("Bearer {}", self.api_key))],
            operation: "OpenAI embeddings",
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
        .send(&body)
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_count(&vectors, texts.len(), "OpenAI")?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance. The embed mode is ignored.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, max_retries: u32) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "Ollama")?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            client: build_client(config.timeout_secs)?,
            timeout_secs: config.timeout_secs,
            max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let json = JsonPost {
            client: &self.client,
            url: format!("{}/api/embed", self.url.trim_end_matches('/')),
            headers: Vec::new(),
            operation: "Ollama embeddings",
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
        .send(&json!({ "model": self.model, "input": texts }))
        .await?;

        let vectors = parse_ollama_response(&json)?;
        check_count(&vectors, texts.len(), "Ollama")?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::failing_server;
    use crate::http::REQUEST_PATH_RETRIES;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let provider = create_provider(&EmbeddingConfig::default(), 0).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
        let err = provider
            .embed(&["hi".to_string()], EmbedMode::Query)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_parse_gemini_single() {
        let json = json!({ "embedding": { "values": [0.5, -0.25] } });
        assert_eq!(parse_gemini_single(&json).unwrap(), vec![0.5, -0.25]);
        assert!(parse_gemini_single(&json!({})).is_err());
    }

    #[test]
    fn test_parse_gemini_batch() {
        let json = json!({ "embeddings": [{ "values": [1.0] }, { "values": [2.0] }] });
        assert_eq!(parse_gemini_batch(&json).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = json!({ "data": [
            { "index": 1, "embedding": [2.0, 2.0] },
            { "index": 0, "embedding": [1.0, 1.0] }
        ]});
        assert_eq!(
            parse_openai_response(&json).unwrap(),
            vec![vec![1.0, 1.0], vec![2.0, 2.0]]
        );
    }

    #[test]
    fn test_parse_ollama() {
        let json = json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(parse_ollama_response(&json!({ "embeddings": [1] })).is_err());
    }

    #[test]
    fn test_gemini_request_carries_task_type_and_dims() {
        let provider = GeminiProvider {
            model: "gemini-embedding-001".into(),
            dims: 768,
            api_key: "k".into(),
            base_url: GEMINI_BASE_URL.into(),
            client: reqwest::Client::new(),
            timeout_secs: 30,
            max_retries: 0,
        };
        let body = provider.request("deploy", EmbedMode::Document);
        assert_eq!(body["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(body["outputDimensionality"], 768);
        assert_eq!(body["model"], "models/gemini-embedding-001");
        assert_eq!(
            provider.post("embedContent").url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent"
        );
    }

    #[test]
    fn test_ollama_needs_model() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(OllamaProvider::new(&config, 0).is_err());
    }

    fn ollama_config(url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some(url),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_query_embedding_without_retries_is_sent_once() {
        let (url, hits) = failing_server().await;
        let provider = create_provider(&ollama_config(url), REQUEST_PATH_RETRIES).unwrap();

        let err = provider
            .embed(&["deploy".to_string()], EmbedMode::Query)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"), "error: {}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ingest_retry_budget_is_honored() {
        let (url, hits) = failing_server().await;
        let provider = create_provider(&ollama_config(url), 1).unwrap();

        assert!(provider
            .embed(&["deploy".to_string()], EmbedMode::Document)
            .await
            .is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

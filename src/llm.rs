//! Language-model backends for decision generation.
//!
//! - **[`DisabledModel`]**: fails every call; the default when no LLM is configured.
//! - **[`GeminiModel`]**: Gemini `generateContent` with a JSON response MIME type.
//! - **[`OpenAIChatModel`]**: OpenAI chat completions with `json_object` output.
//!
//! Each generation is a single request: a failure or timeout is returned
//! as-is and the pipeline turns it into a `retry_request` result. Timeouts
//! surface as [`task_review_core::ReviewError::Timeout`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use task_review_core::decision::{GenerationRequest, LanguageModel};

use crate::config::LlmConfig;
use crate::http::{api_key, build_client, JsonPost, REQUEST_PATH_RETRIES};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

const SYSTEM_PROMPT: &str =
    "You review tasks against policy excerpts and answer only with the requested JSON object.";

pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Language model provider is disabled")
    }
}

// ============ Gemini ============

pub struct GeminiModel {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key: api_key("GEMINI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            client: build_client(config.timeout_secs)?,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

fn gemini_body(request: &GenerationRequest) -> serde_json::Value {
    let mut generation_config = json!({
        "temperature": request.temperature,
        "maxOutputTokens": request.max_output_tokens,
    });
    if request.json_output {
        generation_config["responseMimeType"] = json!("application/json");
    }
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": generation_config,
    })
}

fn gemini_text(value: serde_json::Value) -> Result<String> {
    let parsed: GeminiResponse = serde_json::from_value(value)?;
    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect::<String>())
        .ok_or_else(|| anyhow!("Gemini returned no candidates"))?;
    Ok(text.trim().to_string())
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let json = JsonPost {
            client: &self.client,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.model
            ),
            headers: vec![("x-goog-api-key", self.api_key.clone())],
            operation: "Gemini generation",
            timeout_secs: self.timeout_secs,
            max_retries: REQUEST_PATH_RETRIES,
        }
        .send(&gemini_body(request))
        .await?;
        gemini_text(json)
    }
}

// ============ OpenAI ============

pub struct OpenAIChatModel {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key: api_key("OPENAI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            client: build_client(config.timeout_secs)?,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn openai_body(model: &str, request: &GenerationRequest) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "temperature": request.temperature,
        "max_tokens": request.max_output_tokens,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": request.prompt },
        ],
    });
    if request.json_output {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn openai_text(value: serde_json::Value) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_value(value)?;
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| anyhow!("OpenAI returned no message content"))
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let json = JsonPost {
            client: &self.client,
            url: format!(
                "{}/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ),
            headers: vec![("Authorization", format!("Bearer {}", self.api_key))],
            operation: "OpenAI chat completions",
            timeout_secs: self.timeout_secs,
            max_retries: REQUEST_PATH_RETRIES,
        }
        .send(&openai_body(&self.model, request))
        .await?;
        openai_text(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::failing_server;
    use std::sync::atomic::Ordering;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Review this".into(),
            temperature: 0.1,
            max_output_tokens: 1000,
            json_output: true,
        }
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        let model = create_model(&LlmConfig::default()).unwrap();
        assert_eq!(model.model_name(), "disabled");
        assert!(model.generate(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_openai_generation_is_sent_once() {
        let (url, hits) = failing_server().await;
        let model = OpenAIChatModel {
            model: "gpt-4o-mini".into(),
            api_key: "test-key".into(),
            base_url: url,
            client: build_client(5).unwrap(),
            timeout_secs: 5,
        };

        let err = model.generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("500"), "error: {}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gemini_generation_is_sent_once() {
        let (url, hits) = failing_server().await;
        let model = GeminiModel {
            model: "gemini-1.5-flash".into(),
            api_key: "test-key".into(),
            base_url: url,
            client: build_client(5).unwrap(),
            timeout_secs: 5,
        };

        assert!(model.generate(&request()).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gemini_body_requests_json() {
        let body = gemini_body(&request());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Review this");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1000);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_gemini_text_joins_parts() {
        let value = json!({ "candidates": [{ "content": { "parts": [
            { "text": "{\"decision\":" }, { "text": "\"reject\"}" }
        ]}}]});
        assert_eq!(gemini_text(value).unwrap(), "{\"decision\":\"reject\"}");
        assert!(gemini_text(json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_openai_body_and_text() {
        let body = openai_body("gpt-4o-mini", &request());
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][1]["content"], "Review this");

        let value = json!({ "choices": [{ "message": { "content": " {} " } }] });
        assert_eq!(openai_text(value).unwrap(), "{}");
    }
}

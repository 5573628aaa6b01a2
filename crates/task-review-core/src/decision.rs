//! Decision generation and validation.
//!
//! [`DecisionGenerator`] builds a single prompt from the task and the
//! retrieved evidence, calls a [`LanguageModel`], and runs the raw reply
//! through [`validate_decision`]. The validator is the only path by which
//! model output becomes a [`Decision`]:
//!
//! - the reply must be a JSON object with `decision`, `rationale`,
//!   `citations` and `confidence`
//! - `decision` must be `"approve"` or `"reject"` and `rationale` a string
//! - citations are filtered to tags offered in the same request
//! - confidence outside `[0, 1]` (or non-numeric) becomes `0.0`
//! - malformed `required_actions` entries are dropped
//!
//! Anything that fails these checks becomes the canonical reject.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ReviewError;
use crate::models::{Decision, Outcome, RequiredAction, RetrievalReport};
use crate::retrieval::truncate_chars;

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 5000;

const REQUIRED_KEYS: [&str; 4] = ["decision", "rationale", "citations", "confidence"];

/// One call to a language model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the provider for a JSON-only reply where supported.
    pub json_output: bool,
}

/// Trait for text-generation backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Return the model's text reply. Timeouts should be reported as
    /// [`ReviewError::Timeout`] wrapped in the `anyhow::Error`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_context_chars: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

pub struct DecisionGenerator {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
}

impl DecisionGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, params: GenerationParams) -> Self {
        Self { model, params }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Ask the model for a raw decision.
    ///
    /// Returns `NoEvidence` without calling the model when there are no
    /// passages or tags.
    pub async fn generate(
        &self,
        task_details: &str,
        passages: &[String],
        tags: &[String],
    ) -> Result<String, ReviewError> {
        if passages.is_empty() || tags.is_empty() {
            return Err(ReviewError::NoEvidence);
        }

        let request = GenerationRequest {
            prompt: build_prompt(task_details, passages, tags, self.params.max_context_chars),
            temperature: self.params.temperature,
            max_output_tokens: self.params.max_output_tokens,
            json_output: true,
        };

        let raw = self
            .model
            .generate(&request)
            .await
            .map_err(ReviewError::classify)?;
        debug!(model = self.model.model_name(), chars = raw.len(), "model replied");
        Ok(raw)
    }

    /// Generate and validate a decision for the report's evidence.
    ///
    /// Missing evidence and malformed replies resolve to the canonical
    /// reject; only infrastructure failures and timeouts are returned as
    /// errors.
    pub async fn decide(
        &self,
        task_details: &str,
        report: &RetrievalReport,
    ) -> Result<Decision, ReviewError> {
        let outcome = match self
            .generate(task_details, &report.passages, &report.tags)
            .await
        {
            Ok(raw) => validate_decision(&raw, &report.tags),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(decision) => Ok(decision),
            Err(e @ (ReviewError::NoEvidence | ReviewError::MalformedOutput(_))) => {
                warn!(error = %e, "falling back to canonical reject");
                Ok(Decision::fallback(&e))
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the review prompt. Passages are joined with blank lines and the
/// joined context is cut to `max_context_chars` characters.
pub fn build_prompt(
    task_details: &str,
    passages: &[String],
    tags: &[String],
    max_context_chars: usize,
) -> String {
    let joined = passages.join("\n\n");
    let context = truncate_chars(&joined, max_context_chars);
    let tag_list = Value::from(tags.to_vec());

    format!(
        r#"Review the task below against the policy context and answer with a JSON decision.

TASK:
{task}

POLICY CONTEXT:
{context}

AVAILABLE TAGS:
{tags}

Reply with a single JSON object and nothing else, using exactly these keys:
{{
  "decision": "approve" | "reject",
  "rationale": "why the task does or does not comply, referring to tags",
  "citations": ["tags from AVAILABLE TAGS that support the rationale"],
  "confidence": number between 0.0 and 1.0,
  "required_actions": [
    {{"action": "short_action_name", "description": "what the submitter must do"}}
  ]
}}

Rules:
1. Cite only tags that appear in AVAILABLE TAGS.
2. Answer "approve" only when the context fully shows the task complies.
3. Answer "reject" for non-compliance, missing information or weak context.
4. When rejecting, list concrete required actions and say what is missing."#,
        task = task_details,
        context = context,
        tags = tag_list,
    )
}

/// Validate raw model output against the tags that were offered.
pub fn validate_decision(raw: &str, available_tags: &[String]) -> Result<Decision, ReviewError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ReviewError::MalformedOutput(format!("invalid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ReviewError::MalformedOutput("reply is not a JSON object".into()))?;

    for key in REQUIRED_KEYS {
        if !obj.contains_key(key) {
            return Err(ReviewError::MalformedOutput(format!(
                "missing field `{}`",
                key
            )));
        }
    }

    let outcome = obj["decision"]
        .as_str()
        .and_then(Outcome::parse)
        .ok_or_else(|| {
            ReviewError::MalformedOutput(format!("invalid decision value {}", obj["decision"]))
        })?;
    let rationale = obj["rationale"]
        .as_str()
        .ok_or_else(|| ReviewError::MalformedOutput("rationale is not a string".into()))?
        .to_string();

    let citations = match obj["citations"].as_array() {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|c| available_tags.iter().any(|t| t.as_str() == *c))
            .map(String::from)
            .collect(),
        None => Vec::new(),
    };

    let confidence = obj["confidence"]
        .as_f64()
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(0.0);

    Ok(Decision {
        outcome,
        rationale,
        citations,
        confidence,
        required_actions: required_actions(obj),
    })
}

/// Like [`validate_decision`], resolving any failure to the canonical reject.
pub fn validate(raw: &str, available_tags: &[String]) -> Decision {
    validate_decision(raw, available_tags).unwrap_or_else(|e| {
        warn!(error = %e, "invalid decision output");
        Decision::fallback(&e)
    })
}

fn required_actions(obj: &Map<String, Value>) -> Vec<RequiredAction> {
    let Some(items) = obj.get("required_actions").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let fields = item.as_object()?;
            let action = fields.get("action")?.as_str()?;
            let description = fields.get("description")?.as_str()?;
            Some(RequiredAction::new(action, description))
        })
        .collect()
}

/// Unwrap a reply fenced as ```` ```json ... ``` ````; other text is only trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CANONICAL_REJECT_RATIONALE;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn tags() -> Vec<String> {
        vec!["doc:1#chunk:1".into(), "doc:1#chunk:2".into()]
    }

    enum Reply {
        Text(String),
        Fail,
        Timeout,
    }

    struct ScriptedModel {
        reply: Reply,
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
    }

    impl ScriptedModel {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(request.prompt.clone());
            match &self.reply {
                Reply::Text(t) => Ok(t.clone()),
                Reply::Fail => Err(anyhow!("upstream returned 500")),
                Reply::Timeout => Err(ReviewError::Timeout {
                    operation: "generation".into(),
                    seconds: 60,
                }
                .into()),
            }
        }
    }

    fn report() -> RetrievalReport {
        RetrievalReport {
            passages: vec!["Deploys need a ticket.".into(), "Rollbacks are documented.".into()],
            tags: tags(),
            doc_ids: vec![1],
            coverage: 0.7,
        }
    }

    #[test]
    fn test_valid_decision_passes() {
        let raw = r#"{"decision":"approve","rationale":"ok per doc:1#chunk:1",
            "citations":["doc:1#chunk:1","doc:1#chunk:2"],"confidence":0.8,
            "required_actions":[]}"#;
        let d = validate_decision(raw, &tags()).unwrap();
        assert_eq!(d.outcome, Outcome::Approve);
        assert_eq!(d.citations, tags());
        assert_eq!(d.confidence, 0.8);
    }

    #[test]
    fn test_citations_filtered_to_offered_tags() {
        let raw = r#"{"decision":"reject","rationale":"r",
            "citations":["doc:9#chunk:9","doc:1#chunk:2",3,"doc:1#chunk:1"],"confidence":0.5}"#;
        let d = validate_decision(raw, &tags()).unwrap();
        assert_eq!(d.citations, vec!["doc:1#chunk:2", "doc:1#chunk:1"]);
        assert!(d.required_actions.is_empty());
    }

    #[test]
    fn test_non_array_citations_become_empty() {
        let raw = r#"{"decision":"reject","rationale":"r","citations":"doc:1#chunk:1","confidence":0.5}"#;
        assert!(validate_decision(raw, &tags()).unwrap().citations.is_empty());
    }

    #[test]
    fn test_confidence_out_of_range_zeroed() {
        for c in ["1.5", "-0.1", "\"high\"", "null"] {
            let raw = format!(
                r#"{{"decision":"reject","rationale":"r","citations":[],"confidence":{}}}"#,
                c
            );
            assert_eq!(validate_decision(&raw, &tags()).unwrap().confidence, 0.0);
        }
    }

    #[test]
    fn test_malformed_actions_dropped() {
        let raw = r#"{"decision":"reject","rationale":"r","citations":[],"confidence":0.2,
            "required_actions":[{"action":"add_tests","description":"Add tests"},
                                {"action":"x"}, "fix it", {"action":1,"description":"d"}]}"#;
        let d = validate_decision(raw, &tags()).unwrap();
        assert_eq!(
            d.required_actions,
            vec![RequiredAction::new("add_tests", "Add tests")]
        );
    }

    #[test]
    fn test_malformed_outputs_are_canonical_reject() {
        let cases = [
            "not json",
            "[]",
            r#"{"decision":"approve","citations":[],"confidence":1}"#,
            r#"{"decision":"maybe","rationale":"r","citations":[],"confidence":1}"#,
            r#"{"decision":"approve","rationale":42,"citations":[],"confidence":1}"#,
        ];
        for raw in cases {
            assert!(matches!(
                validate_decision(raw, &tags()),
                Err(ReviewError::MalformedOutput(_))
            ));
            let d = validate(raw, &tags());
            assert_eq!(d.rationale, CANONICAL_REJECT_RATIONALE);
            assert_eq!(d, Decision::canonical_reject());
        }
    }

    #[test]
    fn test_code_fence_unwrapped() {
        let raw = "```json\n{\"decision\":\"reject\",\"rationale\":\"r\",\"citations\":[],\"confidence\":0.1}\n```";
        assert_eq!(validate(raw, &tags()).rationale, "r");
        assert_eq!(strip_code_fence("  {}  "), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[test]
    fn test_prompt_contains_task_context_and_tags() {
        let prompt = build_prompt("Ship v2", &["alpha".into(), "beta".into()], &tags(), 5000);
        assert!(prompt.contains("TASK:\nShip v2"));
        assert!(prompt.contains("alpha\n\nbeta"));
        assert!(prompt.contains(r#"["doc:1#chunk:1","doc:1#chunk:2"]"#));
    }

    #[test]
    fn test_prompt_context_truncated() {
        let prompt = build_prompt("t", &["x".repeat(100)], &tags(), 10);
        assert!(prompt.contains(&format!("POLICY CONTEXT:\n{}\n", "x".repeat(10))));
        assert!(!prompt.contains(&"x".repeat(11)));
    }

    #[tokio::test]
    async fn test_empty_evidence_skips_model() {
        let model = Arc::new(ScriptedModel::new(Reply::Text("{}".into())));
        let generator = DecisionGenerator::new(model.clone(), GenerationParams::default());

        let d = generator
            .decide("task", &RetrievalReport::empty())
            .await
            .unwrap();
        assert_eq!(d, Decision::canonical_reject());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decide_uses_report_evidence() {
        let raw = r#"{"decision":"approve","rationale":"r","citations":["doc:1#chunk:1"],"confidence":0.9}"#;
        let model = Arc::new(ScriptedModel::new(Reply::Text(raw.into())));
        let generator = DecisionGenerator::new(model.clone(), GenerationParams::default());

        let d = generator.decide("Ship v2", &report()).await.unwrap();
        assert!(d.is_approve());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        let prompt = model.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Deploys need a ticket.\n\nRollbacks are documented."));
    }

    #[tokio::test]
    async fn test_decide_malformed_reply_is_canonical_reject() {
        let model = Arc::new(ScriptedModel::new(Reply::Text("I think approve".into())));
        let generator = DecisionGenerator::new(model, GenerationParams::default());
        let d = generator.decide("t", &report()).await.unwrap();
        assert_eq!(d, Decision::canonical_reject());
    }

    #[tokio::test]
    async fn test_decide_propagates_infrastructure_errors() {
        let generator = DecisionGenerator::new(
            Arc::new(ScriptedModel::new(Reply::Fail)),
            GenerationParams::default(),
        );
        let err = generator.decide("t", &report()).await.unwrap_err();
        assert_eq!(err, ReviewError::Infrastructure("upstream returned 500".into()));

        let generator = DecisionGenerator::new(
            Arc::new(ScriptedModel::new(Reply::Timeout)),
            GenerationParams::default(),
        );
        let err = generator.decide("t", &report()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Timeout { seconds: 60, .. }));
    }
}

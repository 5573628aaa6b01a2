//! Data contracts shared by the retriever, the decision generator and the
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk ready to be persisted by the ingestion job.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: i64,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
    pub title: Option<String>,
    pub section: Option<String>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub dims: usize,
    pub task_type: String,
    /// SHA-256 of `text`, hex encoded. Unique across the store.
    pub sha256: String,
    pub ingested_at: DateTime<Utc>,
}

/// A source document registered by the ingestion job.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_hash: String,
    pub total_pages: Option<i64>,
}

/// Processing status of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// One row returned by a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub chunk_id: i64,
    pub document_id: i64,
    pub text: String,
    /// `1 - cosine_distance`.
    pub similarity: f64,
}

/// Evidence gathered for one review request.
///
/// `passages` and `tags` are parallel: `tags[i]` identifies the chunk that
/// `passages[i]` was cut from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalReport {
    pub passages: Vec<String>,
    pub tags: Vec<String>,
    pub doc_ids: Vec<i64>,
    pub coverage: f64,
}

impl RetrievalReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Format the citation tag for a stored chunk.
pub fn chunk_tag(document_id: i64, chunk_id: i64) -> String {
    format!("doc:{}#chunk:{}", document_id, chunk_id)
}

/// Outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approve,
    Reject,
}

impl Outcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(Outcome::Approve),
            "reject" => Some(Outcome::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approve => "approve",
            Outcome::Reject => "reject",
        }
    }
}

/// A follow-up the submitter must perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub action: String,
    pub description: String,
}

impl RequiredAction {
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
        }
    }
}

/// A validated decision.
///
/// Every citation is a tag that was offered to the model in the same request,
/// and `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub outcome: Outcome,
    pub rationale: String,
    pub citations: Vec<String>,
    pub confidence: f64,
    pub required_actions: Vec<RequiredAction>,
}

impl Decision {
    pub fn is_approve(&self) -> bool {
        self.outcome == Outcome::Approve
    }

    /// Number of distinct tags cited.
    pub fn distinct_citations(&self) -> usize {
        let mut seen: Vec<&str> = Vec::with_capacity(self.citations.len());
        for c in &self.citations {
            if !seen.contains(&c.as_str()) {
                seen.push(c);
            }
        }
        seen.len()
    }
}

/// Where a review ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Retrieved,
    CoverageRejected,
    Decided,
    PolicyRejected,
    Final,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::CoverageRejected | Stage::PolicyRejected | Stage::Final | Stage::Failed
        )
    }
}

/// The response assembled for one review request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewResult {
    pub task_id: String,
    pub decision: Outcome,
    pub rationale: String,
    pub citations: Vec<String>,
    pub retrieved_doc_ids: Vec<i64>,
    pub coverage: f64,
    pub confidence: f64,
    pub required_actions: Vec<RequiredAction>,
    pub latency_ms: u64,
    #[serde(skip)]
    pub stage: Stage,
}

impl ReviewResult {
    pub fn assemble(
        task_id: &str,
        decision: Decision,
        report: &RetrievalReport,
        stage: Stage,
        latency_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            decision: decision.outcome,
            rationale: decision.rationale,
            citations: decision.citations,
            retrieved_doc_ids: report.doc_ids.clone(),
            coverage: report.coverage,
            confidence: decision.confidence,
            required_actions: decision.required_actions,
            latency_ms,
            stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_tag_format() {
        assert_eq!(chunk_tag(10, 3), "doc:10#chunk:3");
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!(Outcome::parse("approve"), Some(Outcome::Approve));
        assert_eq!(Outcome::parse("reject"), Some(Outcome::Reject));
        assert_eq!(Outcome::parse("APPROVE"), None);
        assert_eq!(Outcome::parse("maybe"), None);
    }

    #[test]
    fn test_distinct_citations() {
        let d = Decision {
            outcome: Outcome::Approve,
            rationale: String::new(),
            citations: vec![
                "doc:1#chunk:1".into(),
                "doc:1#chunk:1".into(),
                "doc:2#chunk:5".into(),
            ],
            confidence: 0.5,
            required_actions: vec![],
        };
        assert_eq!(d.distinct_citations(), 2);
    }

    #[test]
    fn test_review_result_serializes_response_shape() {
        let report = RetrievalReport {
            passages: vec!["p".into()],
            tags: vec!["doc:1#chunk:1".into()],
            doc_ids: vec![1],
            coverage: 0.5,
        };
        let decision = Decision {
            outcome: Outcome::Reject,
            rationale: "no".into(),
            citations: vec![],
            confidence: 0.0,
            required_actions: vec![RequiredAction::new("a", "b")],
        };
        let result = ReviewResult::assemble("t-1", decision, &report, Stage::Final, 12);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["decision"], "reject");
        assert_eq!(json["retrieved_doc_ids"][0], 1);
        assert_eq!(json["required_actions"][0]["action"], "a");
        assert_eq!(json["latency_ms"], 12);
        assert!(json.get("stage").is_none());
    }
}

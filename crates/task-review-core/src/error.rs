//! Typed review errors and the fallback decisions they map to.
//!
//! Every component that cannot produce a trustworthy decision reports a
//! [`ReviewError`]. [`Decision::fallback`] is the only place where those
//! errors become reject decisions.

use thiserror::Error;

use crate::models::{Decision, Outcome, RequiredAction};

/// Rationale of the canonical reject response.
pub const CANONICAL_REJECT_RATIONALE: &str =
    "Unable to process decision due to insufficient information or invalid data format";

/// Rationale used when the policy gate downgrades an approval.
pub const POLICY_REJECT_RATIONALE: &str = "Insufficient context or citations for approval. Requires higher coverage and at least 2 distinct citations.";

/// Broad category of a [`ReviewError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EvidenceInsufficient,
    UpstreamMalformed,
    PolicyViolation,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReviewError {
    #[error("no passages or tags available for a decision")]
    NoEvidence,

    #[error("coverage {coverage:.2} is below required threshold {threshold}")]
    InsufficientCoverage { coverage: f64, threshold: f64 },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error(
        "approval requires coverage >= {min_coverage} and at least {min_citations} distinct citations \
         (got coverage {coverage:.3}, {citations} distinct citations)"
    )]
    PolicyViolation {
        coverage: f64,
        min_coverage: f64,
        citations: usize,
        min_citations: usize,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("{0}")]
    Infrastructure(String),
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::NoEvidence | ReviewError::InsufficientCoverage { .. } => {
                ErrorKind::EvidenceInsufficient
            }
            ReviewError::MalformedOutput(_) => ErrorKind::UpstreamMalformed,
            ReviewError::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            ReviewError::Timeout { .. } | ReviewError::Infrastructure(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Classify an error coming out of a provider or store.
    ///
    /// Providers that already know what went wrong (e.g. a request timeout)
    /// return a `ReviewError` inside the `anyhow::Error`; anything else is
    /// an infrastructure failure.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<ReviewError>() {
            Ok(review_err) => review_err,
            Err(other) => ReviewError::Infrastructure(format!("{:#}", other)),
        }
    }
}

impl Decision {
    /// The fixed reject used whenever upstream output cannot be trusted.
    pub fn canonical_reject() -> Self {
        Decision {
            outcome: Outcome::Reject,
            rationale: CANONICAL_REJECT_RATIONALE.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            required_actions: vec![RequiredAction::new(
                "provide_more_context",
                "Provide additional documentation or context for review",
            )],
        }
    }

    /// Build the reject decision that stands in for `err`.
    pub fn fallback(err: &ReviewError) -> Self {
        match err {
            ReviewError::NoEvidence | ReviewError::MalformedOutput(_) => Self::canonical_reject(),
            ReviewError::InsufficientCoverage {
                coverage,
                threshold,
            } => Decision {
                outcome: Outcome::Reject,
                rationale: format!(
                    "Insufficient contextual information available for review. \
                     Coverage {:.2} is below required threshold {}.",
                    coverage, threshold
                ),
                citations: Vec::new(),
                confidence: 0.0,
                required_actions: vec![RequiredAction::new(
                    "provide_more_context",
                    "Provide additional context or documentation for review",
                )],
            },
            ReviewError::PolicyViolation { .. } => Decision {
                outcome: Outcome::Reject,
                rationale: POLICY_REJECT_RATIONALE.to_string(),
                citations: Vec::new(),
                confidence: 0.0,
                required_actions: vec![RequiredAction::new(
                    "provide_more_context",
                    "Provide additional documentation or context for review",
                )],
            },
            ReviewError::Timeout { .. } | ReviewError::Infrastructure(_) => Decision {
                outcome: Outcome::Reject,
                rationale: format!("Processing error: {}. Unable to complete review.", err),
                citations: Vec::new(),
                confidence: 0.0,
                required_actions: vec![RequiredAction::new(
                    "retry_request",
                    "Retry the request after checking system status",
                )],
            },
        }
    }
}

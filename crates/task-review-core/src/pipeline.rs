//! The gated review pipeline.
//!
//! ```text
//! START ─▶ RETRIEVED ─┬─▶ COVERAGE_REJECTED
//!                     └─▶ DECIDED ─┬─▶ POLICY_REJECTED
//!                                  └─▶ FINAL
//! ```
//!
//! Both gates are pure functions so they can be tested without providers.
//! [`ReviewPipeline::process_review`] never fails: infrastructure errors
//! end in the `FAILED` stage with a `retry_request` action.

use std::time::Instant;

use tracing::{debug, info, warn, Instrument};

use crate::decision::DecisionGenerator;
use crate::error::ReviewError;
use crate::models::{Decision, RetrievalReport, ReviewResult, Stage};
use crate::retrieval::Retriever;

pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.35;
pub const DEFAULT_APPROVAL_COVERAGE_MIN: f64 = 0.45;
pub const DEFAULT_MIN_DISTINCT_CITATIONS: usize = 2;

/// Thresholds applied by the coverage and policy gates.
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    /// Below this coverage the model is never consulted.
    pub coverage_threshold: f64,
    /// Minimum coverage for an approval to stand.
    pub approval_coverage_min: f64,
    /// Minimum distinct citations for an approval to stand.
    pub min_distinct_citations: usize,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            approval_coverage_min: DEFAULT_APPROVAL_COVERAGE_MIN,
            min_distinct_citations: DEFAULT_MIN_DISTINCT_CITATIONS,
        }
    }
}

/// Reject early when the evidence is too weak to consult the model.
pub fn coverage_gate(report: &RetrievalReport, policy: &GatePolicy) -> Result<(), ReviewError> {
    if report.coverage < policy.coverage_threshold {
        return Err(ReviewError::InsufficientCoverage {
            coverage: report.coverage,
            threshold: policy.coverage_threshold,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyVerdict {
    Honored,
    Downgraded(ReviewError),
}

/// Downgrade an approval in place unless it is backed by enough coverage
/// and enough distinct citations. Rejects are never touched.
pub fn policy_gate(decision: &mut Decision, coverage: f64, policy: &GatePolicy) -> PolicyVerdict {
    if !decision.is_approve() {
        return PolicyVerdict::Honored;
    }

    let citations = decision.distinct_citations();
    if coverage >= policy.approval_coverage_min && citations >= policy.min_distinct_citations {
        return PolicyVerdict::Honored;
    }

    let err = ReviewError::PolicyViolation {
        coverage,
        min_coverage: policy.approval_coverage_min,
        citations,
        min_citations: policy.min_distinct_citations,
    };
    let model_actions = std::mem::take(&mut decision.required_actions);
    *decision = Decision::fallback(&err);
    if !model_actions.is_empty() {
        decision.required_actions = model_actions;
    }
    PolicyVerdict::Downgraded(err)
}

enum PipelineState {
    Start,
    Retrieved(RetrievalReport),
    Decided(RetrievalReport, Decision),
    Done(RetrievalReport, Decision, Stage),
}

impl PipelineState {
    fn stage(&self) -> Stage {
        match self {
            PipelineState::Start => Stage::Start,
            PipelineState::Retrieved(..) => Stage::Retrieved,
            PipelineState::Decided(..) => Stage::Decided,
            PipelineState::Done(_, _, stage) => *stage,
        }
    }
}

pub struct ReviewPipeline {
    retriever: Retriever,
    generator: DecisionGenerator,
    policy: GatePolicy,
}

impl ReviewPipeline {
    pub fn new(retriever: Retriever, generator: DecisionGenerator, policy: GatePolicy) -> Self {
        Self {
            retriever,
            generator,
            policy,
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Review one task. Always returns a well-formed result.
    pub async fn process_review(&self, task_id: &str, task_details: &str) -> ReviewResult {
        let started = Instant::now();
        let span = tracing::info_span!("review", task_id = %task_id);

        let outcome = self.run(task_details).instrument(span.clone()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        span.in_scope(|| match outcome {
            Ok((report, decision, stage)) => {
                info!(
                    stage = ?stage,
                    decision = decision.outcome.as_str(),
                    coverage = report.coverage,
                    latency_ms,
                    "review complete"
                );
                ReviewResult::assemble(task_id, decision, &report, stage, latency_ms)
            }
            Err(e) => {
                warn!(error = %e, latency_ms, "review failed");
                failed_result(task_id, &e, latency_ms)
            }
        })
    }

    async fn run(
        &self,
        task_details: &str,
    ) -> Result<(RetrievalReport, Decision, Stage), ReviewError> {
        let mut state = PipelineState::Start;
        loop {
            debug!(stage = ?state.stage(), "pipeline step");
            state = match state {
                PipelineState::Start => {
                    PipelineState::Retrieved(self.retriever.retrieve(task_details).await)
                }
                PipelineState::Retrieved(report) => match coverage_gate(&report, &self.policy) {
                    Err(e) => {
                        info!(reason = %e, "coverage gate rejected");
                        PipelineState::Done(report, Decision::fallback(&e), Stage::CoverageRejected)
                    }
                    Ok(()) => {
                        let decision = self.generator.decide(task_details, &report).await?;
                        PipelineState::Decided(report, decision)
                    }
                },
                PipelineState::Decided(report, mut decision) => {
                    let stage = match policy_gate(&mut decision, report.coverage, &self.policy) {
                        PolicyVerdict::Honored => Stage::Final,
                        PolicyVerdict::Downgraded(e) => {
                            info!(reason = %e, "policy gate downgraded approval");
                            Stage::PolicyRejected
                        }
                    };
                    PipelineState::Done(report, decision, stage)
                }
                PipelineState::Done(report, decision, stage) => {
                    return Ok((report, decision, stage))
                }
            };
        }
    }
}

/// The result reported when a review could not be completed.
pub fn failed_result(task_id: &str, err: &ReviewError, latency_ms: u64) -> ReviewResult {
    ReviewResult::assemble(
        task_id,
        Decision::fallback(err),
        &RetrievalReport::empty(),
        Stage::Failed,
        latency_ms,
    )
}

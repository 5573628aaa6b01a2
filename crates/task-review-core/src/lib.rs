//! # Task Review Core
//!
//! Runtime-agnostic logic for Task Review: data contracts, the embedding,
//! store and language-model traits, the retriever, decision generation and
//! validation, and the gated review pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Concrete providers and the SQLite store live in the `task-review` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! START ─▶ RETRIEVED ─┬─▶ COVERAGE_REJECTED
//!                     └─▶ DECIDED ─┬─▶ POLICY_REJECTED
//!                                  └─▶ FINAL
//! ```
//!
//! Any error along the way ends in the `FAILED` stage; callers always get a
//! well-formed [`models::ReviewResult`].

pub mod chunk;
pub mod decision;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod store;

pub use decision::{DecisionGenerator, LanguageModel};
pub use embedding::EmbeddingProvider;
pub use error::ReviewError;
pub use models::{Decision, Outcome, RequiredAction, RetrievalReport, ReviewResult, Stage};
pub use pipeline::{GatePolicy, ReviewPipeline};
pub use retrieval::Retriever;
pub use store::ChunkStore;

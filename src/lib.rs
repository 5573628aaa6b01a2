//! # Task Review
//!
//! Automated review of task requests against indexed policy documents.
//!
//! Each review retrieves the policy passages closest to the task, rejects
//! early when they cover it too weakly, asks a language model for a cited
//! decision, and downgrades approvals that lack enough evidence. The core
//! logic lives in [`task_review_core`]; this crate supplies the SQLite store,
//! HTTP providers, ingestion, the HTTP API and the `review` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Policy docs │──▶│   Ingest    │──▶│  SQLite  │
//! │ PDF/TXT/MD  │   │ Chunk+Embed │   │ chunks   │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                                   ┌──────▼──────┐
//!                                   │   Review    │
//!                                   │  pipeline   │
//!                                   └──────┬──────┘
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │ (review) │       │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! review init                   # create database
//! review ingest                 # index ./data
//! review check --task-id T-1 --details "Book a business class flight"
//! review serve                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite chunk store |
//! | [`http`] | Shared retrying JSON client |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Language-model providers |
//! | [`extract`] | PDF and text extraction |
//! | [`ingest`] | Document ingestion |
//! | [`service`] | Review service wiring |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod service;
pub mod sqlite_store;

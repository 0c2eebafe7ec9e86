//! # ragdoc
//!
//! A document ingestion and retrieval service. Uploaded files are checked
//! against their claimed format, stored under a content fingerprint, turned
//! into text by per-format plugins, embedded, and indexed for similarity
//! search and retrieval-augmented chat.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────┐
//! │  Upload  │──▶│ Sniff + Hash │──▶│  feeds/  │──▶│ Plugins  │
//! └──────────┘   └──────────────┘   │ + SQLite │   │ + Embed  │
//!                                   └──────────┘   └────┬─────┘
//!                                                       ▼
//!                      ┌──────────┐   ┌───────────────────┐
//!                      │   Chat   │◀──│ Vector index (DB) │
//!                      └──────────┘   └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragdoc init
//! ragdoc upload ./docs
//! ragdoc list
//! ragdoc parse --id 1
//! ragdoc search "container orchestration"
//! ragdoc serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite metadata and vector stores |
//! | [`embedding`] | Remote and local embedding providers |
//! | [`plugins`] | Per-extension text extraction |
//! | [`ingest`] | Upload, list, and parse operations |
//! | [`retrieval`] | Retrieval-augmented chat |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP API |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod plugins;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;

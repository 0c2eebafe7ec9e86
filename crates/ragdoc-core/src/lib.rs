//! # ragdoc core
//!
//! Backend-agnostic logic for ragdoc: format validation, content
//! fingerprinting, data models, the embedding and storage traits, the
//! content-addressed vector index, prompt assembly, and the decoder for
//! streamed chat completions.
//!
//! This crate contains no tokio runtime, sqlx, HTTP client, or other
//! service-side dependencies. The `ragdoc` application crate supplies the
//! SQLite stores, HTTP embedding backends, extraction plugins, and the
//! server.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sniff`] | Magic-byte, trailer, container, and content validation |
//! | [`hash`] | Streaming SHA-256 content fingerprints |
//! | [`models`] | Documents, vector records, query hits |
//! | [`embedding`] | Embedding provider trait and vector utilities |
//! | [`store`] | Vector and metadata store traits, in-memory vector store |
//! | [`index`] | Upsert/get/query contract over a store and a provider |
//! | [`prompt`] | Hint block and chat message assembly |
//! | [`stream`] | Line-delimited completion frame decoding |
//! | [`error`] | Error taxonomy shared by every layer |

pub mod embedding;
pub mod error;
pub mod hash;
pub mod index;
pub mod models;
pub mod prompt;
pub mod sniff;
pub mod store;
pub mod stream;

pub use error::{Error, Result, ValidationError};

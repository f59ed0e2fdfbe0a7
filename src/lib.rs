//! # Memory Store
//!
//! A markdown memory store: header-aware chunking, embedding, pgvector
//! storage and semantic / full-text / hybrid search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ docs/*.md    │──▶│  Ingestor    │──▶│ Postgres        │
//! │ (watch loop) │   │ chunk+embed  │   │ pgvector + FTS  │
//! └──────────────┘   └──────┬───────┘   └────────┬────────┘
//!                           │                    │
//!                    ┌──────▼───────┐     ┌──────▼──────┐
//!                    │  Embedding   │◀────│ Search API  │
//!                    │  service     │     │  / CLI      │
//!                    └──────────────┘     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`chunk`] | Header-aware markdown chunker |
//! | [`scan`] | Docs root discovery and change snapshots |
//! | [`embedding`] | Embedding client trait and HTTP client |
//! | [`store`] | Storage trait, Postgres and in-memory backends |
//! | [`ingest`] | File → chunks → vectors → store pipeline |
//! | [`search`] | Semantic, full-text and hybrid search |
//! | [`server`] | Search HTTP API |
//! | [`embed_server`] | Embedding HTTP service |
//! | [`watch`] | Polling watch loop |
//! | [`health`] | Processor health checks and server |
//! | [`remote`] | Remote notes API client |
//! | [`task`] | Supervised background tasks |
//! | [`stats`] | `mstore stats` output |
//! | [`error`] | JSON HTTP errors |

pub mod chunk;
pub mod config;
pub mod embed_server;
pub mod embedding;
pub mod error;
pub mod health;
pub mod ingest;
pub mod models;
pub mod remote;
pub mod scan;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod task;
pub mod watch;

//! # codeindex
//!
//! Incremental semantic indexing of source trees.
//!
//! codeindex walks a directory, detects which files changed since the
//! last run, cuts changed files into chunks, embeds every chunk through
//! a provider fallback chain and persists chunks plus per-file
//! change-detection records in a versioned store. Re-running on an
//! unchanged tree does no work.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Collect     │──▶│ Change       │──▶│ Chunk +      │──▶│ Store       │
//! │ (walk+glob) │   │ detection    │   │ Embed        │   │ SQLite/HTTP │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────┬──────┘
//!                                                                │
//!                                            ┌───────────────────┤
//!                                            ▼                   ▼
//!                                       ┌──────────┐       ┌──────────┐
//!                                       │  search  │       │  status  │
//!                                       └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cidx init                     # create the store and run migrations
//! cidx index ./my-project       # incremental index run
//! cidx search "retry policy"    # similarity search
//! cidx status                   # counts, schema version, last run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`checksum`] | Content and chunk hashing |
//! | [`chunk`] | Chunker contract and line-window chunker |
//! | [`connector_fs`] | Directory walk with glob filters |
//! | [`detect`] | mtime + checksum change detection |
//! | [`embedding`] | Embedding service, cache, provider tiers |
//! | [`store`] | Store contract and SQLite/remote/in-memory backends |
//! | [`migrate`] | Schema migrations |
//! | [`db`] | SQLite connection pool |
//! | [`ingest`] | Indexing pipeline |
//! | [`progress`] | Stage progress reporting |
//! | [`search`] | Similarity search |
//! | [`stats`] | Index status |

pub mod checksum;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod stats;
pub mod store;

//! Storage abstraction for Memory Exchange.
//!
//! Two capability traits cover everything the core pipeline and search
//! orchestrator need from an index backend:
//!
//! - [`WriteIndex`] — schema setup plus chunk upsert/delete, used only by
//!   the indexing pipeline (single writer).
//! - [`ReadIndex`] — ranked retrieval and status aggregates, used
//!   concurrently by the search orchestrator and status reporter.
//!
//! The local SQLite backend ([`local::LocalIndex`]) implements both over
//! one WAL-mode pool; the hosted backend ([`azure::AzureSearchIndex`])
//! implements both over the search service's REST API. Implementations
//! must be `Send + Sync` to serve concurrent RPC handlers.

pub mod azure;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, SearchHit};

/// Write-side capability of an index backend.
#[async_trait]
pub trait WriteIndex: Send + Sync {
    /// Idempotent schema/index setup. Safe to call on a populated store.
    async fn ensure_index(&self) -> Result<()>;

    /// Upsert chunks keyed by id. All-or-nothing per call: a failing row
    /// rolls back the whole batch.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Remove every chunk belonging to `source_file` (normalized relative
    /// path). Upserts for a re-ingested file must be preceded by this so
    /// stale ordinals cannot survive.
    async fn delete_chunks_for_file(&self, source_file: &str) -> Result<()>;
}

/// Read-side capability of an index backend.
#[async_trait]
pub trait ReadIndex: Send + Sync {
    /// Ranked retrieval for `(query_text, query_vector, top_k)`. Scores
    /// are provider-native, higher is better.
    async fn search(&self, query: &str, query_vec: &[f32], top_k: usize)
        -> Result<Vec<SearchHit>>;

    /// Total chunks in the index; `0` when the store is unreadable.
    async fn chunk_count(&self) -> i64;

    /// Distinct source files in the index; `0` when the store is unreadable.
    async fn source_file_count(&self) -> i64;

    /// Most recent `last_updated` across chunks, if any.
    async fn last_indexed_time(&self) -> Option<chrono::DateTime<chrono::Utc>>;
}

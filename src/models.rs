//! Core data models used throughout Memory Exchange.
//!
//! The data lifecycle is:
//!
//! ```text
//! Scanner → changed paths → Chunker → Chunk → embed() → Chunk + embedding
//!                                        ↓
//!                                   upsert → search() → SearchHit
//! ```
//!
//! - A **[`Chunk`]** is the unit of indexing and retrieval: a span of
//!   Markdown together with its heading ancestors, tags, and (once the
//!   pipeline has run) a single embedding vector.
//! - **[`IndexState`]** is the scanner's persisted view of the source tree,
//!   keyed by content hash, used to diff incremental runs.
//! - A **[`ScanOutcome`]** is one scan's verdict: which files changed,
//!   which disappeared, and the state to persist on success.
//! - A **[`SearchHit`]** pairs a chunk with a provider-native score
//!   (higher is better).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk of a Markdown knowledge file, stored in the `chunks` table.
///
/// Identity is deterministic: `id` is the first 16 hex chars of
/// `SHA-256(source_file + "::" + chunk_index)`, so re-ingesting an
/// unchanged file produces the same ids and `INSERT OR REPLACE` converges.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// First 16 hex chars of `SHA-256(source_file + "::" + chunk_index)`.
    pub id: String,
    /// Chunk text, 100–2000 chars after trimming (soft cap for atomic blocks).
    pub content: String,
    /// Relative path, forward-slash normalized, no leading slash.
    pub source_file: String,
    /// Breadcrumb of heading ancestors, e.g. `"Guide > Setup > Linux"`.
    /// Empty for pre-heading prelude.
    pub heading_path: String,
    /// `"root"`, or the first path segment under `domains/`.
    pub domain: String,
    /// Extracted backtick PascalCase terms and file-path-shaped tokens.
    pub tags: Vec<String>,
    /// Relative paths referenced by `[...](...md)` links, fragments stripped.
    pub related_files: Vec<String>,
    /// True iff `source_file` ends with `.instructions.md` (case-insensitive).
    pub is_instruction: bool,
    /// L2-normalized embedding; `None` until the pipeline embeds the chunk.
    pub embedding: Option<Vec<f32>>,
    /// Ingestion timestamp.
    pub last_updated: DateTime<Utc>,
    /// Zero-based ordinal within `source_file`.
    pub chunk_index: i64,
}

/// Persisted scanner state, written to `<root>/.memory-exchange-state.json`.
///
/// Loaded at scan start; a missing or malformed file is treated as empty so
/// the next pass degrades to a full rebuild rather than failing. Written
/// back (pretty-printed, via temp-file + rename) only after a pipeline pass
/// fully succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexState {
    /// Normalized relative path → lowercase hex SHA-256 of file bytes.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    /// Set when a forced or first-time full pass completes.
    #[serde(default)]
    pub last_full_index_utc: Option<DateTime<Utc>>,
    /// Set when an incremental pass completes.
    #[serde(default)]
    pub last_incremental_index_utc: Option<DateTime<Utc>>,
    /// Logical index name last written into this state.
    #[serde(default)]
    pub index_name: String,
}

/// Result of one scanner pass over the source tree.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Files whose content hash differs from the previous state (or all
    /// files, on a full rebuild). Normalized relative paths.
    pub changed: Vec<String>,
    /// Paths present in the previous state but gone from the tree.
    pub deleted: Vec<String>,
    /// Every retained file in the tree.
    pub all: Vec<String>,
    /// State loaded from disk at scan start.
    pub prev_state: IndexState,
    /// Fresh state to persist once the pipeline succeeds.
    pub new_state: IndexState,
}

/// A scored search result. Scores are provider-native; after the local
/// store's RRF merge, higher is better.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
}

impl Chunk {
    /// Deterministic chunk id: first 16 hex chars of
    /// `SHA-256(source_file + "::" + chunk_index)`.
    pub fn make_id(source_file: &str, chunk_index: i64) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(source_file.as_bytes());
        hasher.update(b"::");
        hasher.update(chunk_index.to_string().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// Normalize a path for storage and comparison: forward slashes, no
/// leading `/` or `./`.
pub fn normalize_rel_path(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = Chunk::make_id("guides/setup.md", 0);
        let b = Chunk::make_id("guides/setup.md", 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chunk_id_varies_by_path_and_index() {
        let base = Chunk::make_id("a.md", 0);
        assert_ne!(base, Chunk::make_id("a.md", 1));
        assert_ne!(base, Chunk::make_id("b.md", 0));
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("domains\\rp\\b.md"), "domains/rp/b.md");
        assert_eq!(normalize_rel_path("/a.md"), "a.md");
        assert_eq!(normalize_rel_path("./x/y.md"), "x/y.md");
        assert_eq!(normalize_rel_path("plain.md"), "plain.md");
    }

    #[test]
    fn test_index_state_json_field_names() {
        let mut state = IndexState::default();
        state
            .file_hashes
            .insert("a.md".to_string(), "00".repeat(32));
        state.index_name = "memory-exchange".to_string();

        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(json.contains("\"fileHashes\""));
        assert!(json.contains("\"lastFullIndexUtc\""));
        assert!(json.contains("\"lastIncrementalIndexUtc\""));
        assert!(json.contains("\"indexName\""));

        let back: IndexState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.file_hashes.len(), 1);
        assert_eq!(back.index_name, "memory-exchange");
    }

    #[test]
    fn test_index_state_tolerates_missing_fields() {
        let state: IndexState = serde_json::from_str("{}").unwrap();
        assert!(state.file_hashes.is_empty());
        assert!(state.last_full_index_utc.is_none());
    }
}

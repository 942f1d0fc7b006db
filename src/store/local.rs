//! SQLite-backed local index.
//!
//! One `chunks` table carries every chunk field (tags and related files as
//! JSON arrays, the embedding as a little-endian f32 BLOB), an FTS5 virtual
//! table mirrors the searchable columns for BM25 ranking, and triggers keep
//! the two in lockstep. The connection pool runs in WAL mode so the single
//! pipeline writer coexists with concurrent search readers.
//!
//! The read side fuses two ranked passes with Reciprocal Rank Fusion:
//! a BM25 keyword pass (with a `LIKE` fallback when the sanitized query
//! still trips FTS5 syntax) and a brute-force cosine pass over all stored
//! vectors, sized for corpora of ≲10⁴ chunks.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, SearchHit};
use crate::store::{ReadIndex, WriteIndex};

/// RRF constant from the original paper; larger values flatten the
/// contribution of top ranks.
const RRF_K: f64 = 60.0;

/// Multiplier applied to `top_k` when fetching per-pass candidates, so the
/// fusion has enough overlap to work with.
const CANDIDATE_FACTOR: usize = 3;

/// Characters with reserved meaning in FTS5 query syntax.
const FTS_RESERVED: &[char] = &['"', '*', '(', ')', ':', '^', '{', '}', '~'];

/// SQLite implementation of both index roles.
pub struct LocalIndex {
    pool: SqlitePool,
}

impl LocalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// BM25 keyword pass: top `limit` chunks, best first. Returns an empty
    /// list when sanitization leaves no tokens; falls back to a `LIKE`
    /// scan when FTS5 still rejects the query.
    async fn keyword_pass(&self, query: &str, limit: i64) -> Result<Vec<Chunk>> {
        let fts_query = match build_fts_query(query) {
            Some(q) => q,
            None => return Ok(Vec::new()),
        };

        let result = sqlx::query(
            r#"
            SELECT c.id, c.content, c.source_file, c.heading_path, c.domain,
                   c.tags, c.related_files, c.is_instruction, c.embedding,
                   c.last_updated, c.chunk_index
            FROM chunks_fts
            JOIN chunks c ON c.rowid = chunks_fts.rowid
            WHERE chunks_fts MATCH ?
            ORDER BY bm25(chunks_fts)
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_fts_syntax_error(&e) => {
                debug!(query, "FTS rejected query, falling back to LIKE scan");
                sqlx::query(
                    r#"
                    SELECT id, content, source_file, heading_path, domain,
                           tags, related_files, is_instruction, embedding,
                           last_updated, chunk_index
                    FROM chunks
                    WHERE content LIKE ?
                    ORDER BY last_updated DESC
                    LIMIT ?
                    "#,
                )
                .bind(format!("%{}%", query))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(e) => return Err(e.into()),
        };

        rows.iter().map(chunk_from_row).collect()
    }

    /// Brute-force cosine pass over every stored vector, best first.
    async fn vector_pass(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Chunk>> {
        if query_vec.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, content, source_file, heading_path, domain,
                   tags, related_files, is_instruction, embedding,
                   last_updated, chunk_index
            FROM chunks
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(Chunk, f64)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row)?;
            let similarity = chunk
                .embedding
                .as_deref()
                .map(|v| cosine_similarity(query_vec, v) as f64)
                .unwrap_or(0.0);
            scored.push((chunk, similarity));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(c, _)| c).collect())
    }
}

#[async_trait]
impl WriteIndex for LocalIndex {
    async fn ensure_index(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source_file TEXT NOT NULL,
                heading_path TEXT NOT NULL DEFAULT '',
                domain TEXT NOT NULL DEFAULT 'root',
                tags TEXT NOT NULL DEFAULT '[]',
                related_files TEXT NOT NULL DEFAULT '[]',
                is_instruction INTEGER NOT NULL DEFAULT 0,
                embedding BLOB,
                last_updated TEXT NOT NULL,
                chunk_index INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_file ON chunks(source_file)")
            .execute(&self.pool)
            .await?;

        // FTS5 virtual tables have no IF NOT EXISTS; check first.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    content,
                    heading_path,
                    domain,
                    tags,
                    content='chunks',
                    content_rowid='rowid'
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content, heading_path, domain, tags)
                VALUES (new.rowid, new.content, new.heading_path, new.domain, new.tags);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, domain, tags)
                VALUES ('delete', old.rowid, old.content, old.heading_path, old.domain, old.tags);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, domain, tags)
                VALUES ('delete', old.rowid, old.content, old.heading_path, old.domain, old.tags);
                INSERT INTO chunks_fts(rowid, content, heading_path, domain, tags)
                VALUES (new.rowid, new.content, new.heading_path, new.domain, new.tags);
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let tags_json = serde_json::to_string(&chunk.tags)?;
            let related_json = serde_json::to_string(&chunk.related_files)?;
            let embedding_blob = chunk.embedding.as_deref().map(vec_to_blob);

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks
                    (id, content, source_file, heading_path, domain, tags,
                     related_files, is_instruction, embedding, last_updated, chunk_index)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(&chunk.source_file)
            .bind(&chunk.heading_path)
            .bind(&chunk.domain)
            .bind(&tags_json)
            .bind(&related_json)
            .bind(chunk.is_instruction as i64)
            .bind(&embedding_blob)
            .bind(chunk.last_updated.to_rfc3339())
            .bind(chunk.chunk_index)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks_for_file(&self, source_file: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE source_file = ?")
            .bind(source_file)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReadIndex for LocalIndex {
    async fn search(
        &self,
        query: &str,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let fetch = top_k * CANDIDATE_FACTOR;
        let keyword = self.keyword_pass(query, fetch as i64).await?;
        let vector = self.vector_pass(query_vec, fetch).await?;
        Ok(rrf_merge(keyword, vector))
    }

    async fn chunk_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0)
    }

    async fn source_file_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(DISTINCT source_file) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0)
    }

    async fn last_indexed_time(&self) -> Option<DateTime<Utc>> {
        let latest: Option<String> = sqlx::query_scalar("SELECT MAX(last_updated) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .ok()?;
        let latest = latest?;
        DateTime::parse_from_rfc3339(&latest)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Sanitize a user query into an FTS5 expression: strip reserved
/// characters, quote each remaining token, OR them together. `None` when
/// nothing survives.
fn build_fts_query(query: &str) -> Option<String> {
    let cleaned: String = query
        .chars()
        .map(|c| if FTS_RESERVED.contains(&c) { ' ' } else { c })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// SQLITE_ERROR (code 1) is what FTS5 reports for query syntax problems.
fn is_fts_syntax_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("1") || db.message().contains("fts5: syntax error")
        }
        _ => false,
    }
}

/// Reciprocal Rank Fusion over the two ranked passes.
///
/// `score(chunk) = Σ 1 / (RRF_K + rank)` with zero-based ranks; a chunk
/// absent from a list contributes nothing from it. Result is sorted best
/// first.
fn rrf_merge(keyword: Vec<Chunk>, vector: Vec<Chunk>) -> Vec<SearchHit> {
    let mut merged: HashMap<String, (Chunk, f64)> = HashMap::new();

    for ranking in [keyword, vector] {
        for (rank, chunk) in ranking.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f64);
            merged
                .entry(chunk.id.clone())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert((chunk, contribution));
        }
    }

    let mut hits: Vec<SearchHit> = merged
        .into_values()
        .map(|(chunk, score)| SearchHit { chunk, score })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let tags_json: String = row.get("tags");
    let related_json: String = row.get("related_files");
    let embedding_blob: Option<Vec<u8>> = row.get("embedding");
    let last_updated: String = row.get("last_updated");
    let is_instruction: i64 = row.get("is_instruction");

    Ok(Chunk {
        id: row.get("id"),
        content: row.get("content"),
        source_file: row.get("source_file"),
        heading_path: row.get("heading_path"),
        domain: row.get("domain"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        related_files: serde_json::from_str(&related_json).unwrap_or_default(),
        is_instruction: is_instruction != 0,
        embedding: embedding_blob.as_deref().map(blob_to_vec),
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        chunk_index: row.get("chunk_index"),
    })
}

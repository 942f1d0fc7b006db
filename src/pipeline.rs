//! Indexing pipeline orchestration.
//!
//! Coordinates one full pass: ensure schema → scan → delete removed files →
//! chunk changed files → embed in one batch → upsert → persist scan state.
//!
//! Failure semantics: state is persisted only after everything else has
//! succeeded, so an aborted pass leaves the previous state (and therefore
//! the same dirty set) for the next run. Per-file deletes and upserts that
//! land before an abort are harmless — re-running converges. A mutex
//! serializes passes so there is exactly one writer at a time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chunker::chunk_markdown;
use crate::embedding::Embedder;
use crate::routing::{domain_from_source_path, RoutingMap, RoutingSlot};
use crate::scanner::Scanner;
use crate::store::WriteIndex;

/// File name of the optional domain-routing management file at the corpus
/// root.
pub const MANAGEMENT_FILE_NAME: &str = "MemoryExchangeManagement.md";

/// Counters from one pipeline pass, for CLI reporting and logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineReport {
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_written: usize,
}

pub struct IndexingPipeline {
    write_index: Arc<dyn WriteIndex>,
    embedder: Arc<dyn Embedder>,
    scanner: Scanner,
    routing: Arc<RoutingSlot>,
    write_lock: Mutex<()>,
}

impl IndexingPipeline {
    pub fn new(
        write_index: Arc<dyn WriteIndex>,
        embedder: Arc<dyn Embedder>,
        scanner: Scanner,
        routing: Arc<RoutingSlot>,
    ) -> Self {
        Self {
            write_index,
            embedder,
            scanner,
            routing,
            write_lock: Mutex::new(()),
        }
    }

    /// Run one indexing pass. Concurrent invocations queue behind the
    /// write lock.
    pub async fn run(
        &self,
        source_root: &Path,
        force_full: bool,
        index_name: &str,
    ) -> Result<PipelineReport> {
        let _writer = self.write_lock.lock().await;

        self.write_index
            .ensure_index()
            .await
            .context("failed to prepare the index schema")?;

        let mut scan = self
            .scanner
            .scan(source_root, force_full, index_name)
            .with_context(|| format!("failed to scan {}", source_root.display()))?;

        if scan.changed.is_empty() && scan.deleted.is_empty() {
            info!(root = %source_root.display(), "index already up to date");
            return Ok(PipelineReport::default());
        }

        self.refresh_routing(source_root);

        let mut report = PipelineReport::default();

        for path in &scan.deleted {
            self.write_index.delete_chunks_for_file(path).await?;
            report.files_deleted += 1;
        }

        let mut buffered = Vec::new();
        for path in &scan.changed {
            let absolute = source_root.join(path);
            let text = match std::fs::read_to_string(&absolute) {
                Ok(text) => text,
                Err(e) => {
                    // Fail this file only; dropping its hash keeps it in
                    // the dirty set for the next pass.
                    warn!(path = %absolute.display(), error = %e, "skipping unreadable file");
                    scan.new_state.file_hashes.remove(path);
                    continue;
                }
            };

            let domain = domain_from_source_path(path);
            let chunks = chunk_markdown(&text, path, &domain);

            self.write_index.delete_chunks_for_file(path).await?;
            report.files_indexed += 1;
            buffered.extend(chunks);
        }

        if !buffered.is_empty() {
            let texts: Vec<String> = buffered.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .context("embedding failed, index state not persisted")?;
            for (chunk, vector) in buffered.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }

            self.write_index.upsert_chunks(&buffered).await?;
            report.chunks_written = buffered.len();
        }

        self.scanner
            .save_state(source_root, &scan.new_state)
            .context("failed to persist scan state")?;

        info!(
            indexed = report.files_indexed,
            deleted = report.files_deleted,
            chunks = report.chunks_written,
            "indexing pass complete"
        );
        Ok(report)
    }

    /// Re-read the management file and swap the shared routing map.
    /// Parse problems are logged and leave routing disabled, never fatal.
    fn refresh_routing(&self, source_root: &Path) {
        let path = source_root.join(MANAGEMENT_FILE_NAME);
        if !path.is_file() {
            return;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let map = RoutingMap::parse(&text);
                if map.is_empty() {
                    warn!(path = %path.display(), "management file has no routing entries");
                }
                self.routing.replace(map);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read management file");
            }
        }
    }
}

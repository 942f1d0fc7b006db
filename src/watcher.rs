//! Watch loop: file-system events → debounced re-index.
//!
//! On startup the watcher runs one pipeline pass, then observes the source
//! tree recursively. Events touching `*.md` paths collapse into a
//! single-slot dirty signal; after [`DEBOUNCE`] of quiescence (the wait
//! restarts on every fresh event) one further pass runs. Indexing errors
//! are logged and swallowed so the loop keeps serving future changes.
//! A stop signal drains the current state and ends the loop; an in-flight
//! pass is allowed to finish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::pipeline::IndexingPipeline;

/// Quiescence window before a rebuild is triggered.
pub const DEBOUNCE: Duration = Duration::from_secs(2);

pub struct WatchLoop {
    pipeline: Arc<IndexingPipeline>,
    source_root: PathBuf,
    index_name: String,
}

impl WatchLoop {
    pub fn new(pipeline: Arc<IndexingPipeline>, source_root: PathBuf, index_name: String) -> Self {
        Self {
            pipeline,
            source_root,
            index_name,
        }
    }

    /// Run until `stop` flips to `true`.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        // Startup pass; failures are logged like any other watch-time error.
        self.rebuild().await;

        // Capacity 1: redundant dirty signals collapse while one is pending.
        let (dirty_tx, mut dirty_rx) = mpsc::channel::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) if touches_markdown(&event) => {
                    let _ = dirty_tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "file watcher error"),
            },
            notify::Config::default(),
        )
        .context("failed to create file watcher")?;

        watcher
            .watch(&self.source_root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", self.source_root.display()))?;

        info!(root = %self.source_root.display(), "watching for changes");

        loop {
            // Idle: wait for a dirty signal or the stop flag.
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                signal = dirty_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    // Dirty: restart the debounce wait on every fresh event.
                    loop {
                        match timeout(DEBOUNCE, dirty_rx.recv()).await {
                            Ok(Some(())) => continue,
                            Ok(None) => return Ok(()),
                            Err(_) => break,
                        }
                    }
                    self.rebuild().await;
                }
            }
        }

        info!("watch loop stopped");
        Ok(())
    }

    async fn rebuild(&self) {
        debug!("running watch-triggered indexing pass");
        if let Err(e) = self
            .pipeline
            .run(&self.source_root, false, &self.index_name)
            .await
        {
            error!(error = %e, "indexing pass failed, watching continues");
        }
    }
}

/// True when any path in the event refers to a Markdown file.
fn touches_markdown(event: &Event) -> bool {
    event
        .paths
        .iter()
        .any(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md")))
}

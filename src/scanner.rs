//! Source-tree scanner with content-hash change detection.
//!
//! Walks the Markdown corpus, hashes every retained file, and diffs the
//! result against the state persisted by the previous successful pipeline
//! pass. The scanner itself never writes state — [`Scanner::save_state`]
//! is called by the pipeline only after the whole pass succeeds, so a
//! failed run leaves the dirty set intact for the next attempt.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::models::{normalize_rel_path, IndexState, ScanOutcome};

/// File name of the persisted scan state, stored at the corpus root.
pub const STATE_FILE_NAME: &str = ".memory-exchange-state.json";

/// Scanner over a Markdown source tree.
pub struct Scanner {
    exclude: GlobSet,
}

impl Scanner {
    /// Build a scanner with user-configured exclusion globs. Paths under
    /// `personal/` are always excluded regardless of configuration.
    pub fn new(exclude_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern: {}", pattern))?;
            builder.add(glob);
        }
        Ok(Self {
            exclude: builder.build()?,
        })
    }

    /// Walk `root`, hash every retained `*.md` file, and diff against the
    /// persisted state.
    ///
    /// With `force_full_rebuild` (or when no previous hashes exist) every
    /// file is reported changed and `lastFullIndexUtc` is stamped;
    /// otherwise only hash mismatches count and `lastIncrementalIndexUtc`
    /// is stamped.
    pub fn scan(
        &self,
        root: &Path,
        force_full_rebuild: bool,
        index_name: &str,
    ) -> Result<ScanOutcome> {
        let prev_state = load_state(root);
        let mut new_state = IndexState {
            index_name: index_name.to_string(),
            last_full_index_utc: prev_state.last_full_index_utc,
            last_incremental_index_utc: prev_state.last_incremental_index_utc,
            ..Default::default()
        };

        let mut all = Vec::new();

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
            {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel = normalize_rel_path(&relative.to_string_lossy());

            if rel.to_lowercase().starts_with("personal/") {
                continue;
            }
            if self.exclude.is_match(&rel) {
                continue;
            }

            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let hash = format!("{:x}", hasher.finalize());

            new_state.file_hashes.insert(rel.clone(), hash);
            all.push(rel);
        }

        all.sort();

        let full = force_full_rebuild || prev_state.file_hashes.is_empty();
        let now = Utc::now();

        let (changed, deleted) = if full {
            new_state.last_full_index_utc = Some(now);
            (all.clone(), Vec::new())
        } else {
            new_state.last_incremental_index_utc = Some(now);
            let changed: Vec<String> = all
                .iter()
                .filter(|path| {
                    prev_state.file_hashes.get(*path) != new_state.file_hashes.get(*path)
                })
                .cloned()
                .collect();
            let deleted: Vec<String> = prev_state
                .file_hashes
                .keys()
                .filter(|path| !new_state.file_hashes.contains_key(*path))
                .cloned()
                .collect();
            (changed, deleted)
        };

        Ok(ScanOutcome {
            changed,
            deleted,
            all,
            prev_state,
            new_state,
        })
    }

    /// Persist scan state as pretty JSON, atomically (temp file + rename).
    pub fn save_state(&self, root: &Path, state: &IndexState) -> Result<()> {
        save_state(root, state)
    }
}

/// Load persisted state from `<root>/.memory-exchange-state.json`.
/// Missing or malformed state degrades to empty (the next pass becomes a
/// full rebuild) rather than failing.
pub fn load_state(root: &Path) -> IndexState {
    let path = root.join(STATE_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => return IndexState::default(),
    };
    match serde_json::from_str(&content) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed state file, treating as empty");
            IndexState::default()
        }
    }
}

/// Write state as pretty JSON via temp file + rename so readers never see
/// a torn file.
pub fn save_state(root: &Path, state: &IndexState) -> Result<()> {
    let path = root.join(STATE_FILE_NAME);
    let tmp = root.join(format!("{}.tmp", STATE_FILE_NAME));
    let json = serde_json::to_string_pretty(state)?;
    std::fs::write(&tmp, json)
        .with_context(|| format!("failed to write state to {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("failed to move state into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_first_scan_is_full() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A\nalpha");
        write(dir.path(), "domains/rp/b.md", "# B\nbeta");

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), false, "memex").unwrap();

        assert_eq!(scan.all, vec!["a.md", "domains/rp/b.md"]);
        assert_eq!(scan.changed, scan.all);
        assert!(scan.deleted.is_empty());
        assert!(scan.new_state.last_full_index_utc.is_some());
        assert!(scan.new_state.last_incremental_index_utc.is_none());
    }

    #[test]
    fn test_unchanged_tree_is_clean() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A\nalpha");

        let scanner = Scanner::new(&[]).unwrap();
        let first = scanner.scan(dir.path(), true, "memex").unwrap();
        scanner.save_state(dir.path(), &first.new_state).unwrap();

        let second = scanner.scan(dir.path(), false, "memex").unwrap();
        assert!(second.changed.is_empty());
        assert!(second.deleted.is_empty());
        assert_eq!(second.all, vec!["a.md"]);
        assert_eq!(second.prev_state.file_hashes, second.new_state.file_hashes);
    }

    #[test]
    fn test_modification_detected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A\nalpha");
        write(dir.path(), "b.md", "# B\nbeta");

        let scanner = Scanner::new(&[]).unwrap();
        let first = scanner.scan(dir.path(), true, "memex").unwrap();
        scanner.save_state(dir.path(), &first.new_state).unwrap();

        write(dir.path(), "a.md", "# A\nalpha!");
        let second = scanner.scan(dir.path(), false, "memex").unwrap();
        assert_eq!(second.changed, vec!["a.md"]);
        assert!(second.deleted.is_empty());
        assert!(second.new_state.last_incremental_index_utc.is_some());
    }

    #[test]
    fn test_deletion_detected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A\nalpha");
        write(dir.path(), "b.md", "# B\nbeta");

        let scanner = Scanner::new(&[]).unwrap();
        let first = scanner.scan(dir.path(), true, "memex").unwrap();
        scanner.save_state(dir.path(), &first.new_state).unwrap();

        fs::remove_file(dir.path().join("a.md")).unwrap();
        let second = scanner.scan(dir.path(), false, "memex").unwrap();
        assert!(second.changed.is_empty());
        assert_eq!(second.deleted, vec!["a.md"]);
    }

    #[test]
    fn test_personal_always_excluded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "personal/diary.md", "# Private");
        write(dir.path(), "Personal/notes.md", "# Private too");

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), true, "memex").unwrap();
        assert_eq!(scan.all, vec!["a.md"]);
    }

    #[test]
    fn test_user_excludes_applied() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "drafts/wip.md", "# WIP");

        let scanner = Scanner::new(&["drafts/**".to_string()]).unwrap();
        let scan = scanner.scan(dir.path(), true, "memex").unwrap();
        assert_eq!(scan.all, vec!["a.md"]);
    }

    #[test]
    fn test_non_markdown_ignored() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "script.sh", "echo hi");

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), true, "memex").unwrap();
        assert_eq!(scan.all, vec!["a.md"]);
    }

    #[test]
    fn test_malformed_state_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");
        fs::write(dir.path().join(STATE_FILE_NAME), "not json {").unwrap();

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), false, "memex").unwrap();
        // Empty previous hashes degrade to a full pass.
        assert_eq!(scan.changed, vec!["a.md"]);
        assert!(scan.new_state.last_full_index_utc.is_some());
    }

    #[test]
    fn test_state_round_trip_pretty_json() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), true, "memex").unwrap();
        scanner.save_state(dir.path(), &scan.new_state).unwrap();

        let raw = fs::read_to_string(dir.path().join(STATE_FILE_NAME)).unwrap();
        assert!(raw.contains('\n'), "state should be pretty-printed");
        assert!(raw.contains("\"fileHashes\""));

        let loaded = load_state(dir.path());
        assert_eq!(loaded.file_hashes, scan.new_state.file_hashes);
        assert_eq!(loaded.index_name, "memex");
    }

    #[test]
    fn test_hashes_are_lowercase_hex() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "# A");

        let scanner = Scanner::new(&[]).unwrap();
        let scan = scanner.scan(dir.path(), true, "memex").unwrap();
        let hash = scan.new_state.file_hashes.get("a.md").unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}

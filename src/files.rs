//! Knowledge-file retrieval with a directory-traversal guard.
//!
//! `get_file` takes a relative path from the tool surface, resolves it
//! against the configured source root, and refuses anything that escapes
//! the root after canonicalization (`..` segments, absolute paths,
//! symlinks pointing outside). Violations come back as error strings, not
//! errors — the RPC layer forwards them verbatim.

use std::path::Path;

/// Read a knowledge file relative to `source_root`.
///
/// Returns the file contents, or an error message suitable for returning
/// directly to the calling tool.
pub fn read_relative(source_root: &Path, rel_path: &str) -> Result<String, String> {
    if rel_path.trim().is_empty() {
        return Err("filePath must not be empty".to_string());
    }

    let canonical_root = source_root
        .canonicalize()
        .map_err(|e| format!("source root is not accessible: {}", e))?;

    let normalized = rel_path.replace('\\', "/");
    let resolved = canonical_root.join(&normalized);

    let canonical = resolved
        .canonicalize()
        .map_err(|_| format!("file not found: {}", normalized))?;

    if !canonical.starts_with(&canonical_root) {
        return Err(format!(
            "access denied: {} resolves outside the knowledge base",
            normalized
        ));
    }

    std::fs::read_to_string(&canonical)
        .map_err(|e| format!("failed to read {}: {}", normalized, e))
}

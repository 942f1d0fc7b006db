//! Index status overview.
//!
//! Produces the human-readable report behind the `status` tool and the
//! `memx status` command: what is indexed, where it lives, and what to do
//! when the index is empty.

use std::path::Path;

use crate::store::ReadIndex;

/// Build the status report for the given index.
pub async fn report(
    read_index: &dyn ReadIndex,
    source_root: Option<&Path>,
    provider: &str,
    index_name: &str,
) -> String {
    let chunk_count = read_index.chunk_count().await;
    let file_count = read_index.source_file_count().await;
    let last_indexed = read_index.last_indexed_time().await;

    let mut out = String::from("Memory Exchange — Status\n");
    out.push_str("========================\n\n");

    match source_root {
        Some(root) => out.push_str(&format!("  Source root:  {}\n", root.display())),
        None => out.push_str("  Source root:  (not configured)\n"),
    }
    out.push_str(&format!("  Provider:     {}\n", provider));
    out.push_str(&format!("  Index name:   {}\n\n", index_name));

    out.push_str(&format!("  Chunks:       {}\n", chunk_count));
    out.push_str(&format!("  Source files: {}\n", file_count));
    match last_indexed {
        Some(ts) => out.push_str(&format!(
            "  Last indexed: {}\n",
            ts.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        None => out.push_str("  Last indexed: never\n"),
    }

    if chunk_count == 0 {
        out.push('\n');
        out.push_str("The index is empty. Run `memx index` (or start with build_index = true) ");
        out.push_str("to index the knowledge base, and check that source_path points at a ");
        out.push_str("directory containing Markdown files.\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::SearchHit;

    struct FakeIndex {
        chunks: i64,
        files: i64,
        last: Option<DateTime<Utc>>,
    }

    #[async_trait]
    impl ReadIndex for FakeIndex {
        async fn search(&self, _q: &str, _v: &[f32], _k: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
        async fn chunk_count(&self) -> i64 {
            self.chunks
        }
        async fn source_file_count(&self) -> i64 {
            self.files
        }
        async fn last_indexed_time(&self) -> Option<DateTime<Utc>> {
            self.last
        }
    }

    #[tokio::test]
    async fn test_report_with_content() {
        let index = FakeIndex {
            chunks: 42,
            files: 7,
            last: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        };
        let text = report(
            &index,
            Some(Path::new("/kb")),
            "local",
            "memory-exchange",
        )
        .await;

        assert!(text.contains("Chunks:       42"));
        assert!(text.contains("Source files: 7"));
        assert!(text.contains("2026-03-01 12:00:00 UTC"));
        assert!(text.contains("/kb"));
        assert!(!text.contains("index is empty"));
    }

    #[tokio::test]
    async fn test_report_empty_index_has_remediation() {
        let index = FakeIndex {
            chunks: 0,
            files: 0,
            last: None,
        };
        let text = report(&index, None, "local", "memory-exchange").await;

        assert!(text.contains("Last indexed: never"));
        assert!(text.contains("index is empty"));
        assert!(text.contains("memx index"));
    }
}

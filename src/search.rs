//! Search orchestration: query embedding, hybrid retrieval, boosting, and
//! result formatting.
//!
//! The orchestrator embeds the query once, over-fetches from the read
//! index, applies domain- and instruction-aware boosts when the caller's
//! current file resolves to relevant domains, and renders the final
//! ranking as text for the tool surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::embedding::Embedder;
use crate::models::{Chunk, SearchHit};
use crate::routing::RoutingSlot;
use crate::store::ReadIndex;

/// Multiplier for chunks whose domain matches the caller's current file.
pub const DOMAIN_BOOST: f64 = 1.3;
/// Additional multiplier for instruction files, applied only when domain
/// routing produced a non-empty set for the caller.
pub const INSTRUCTION_BOOST: f64 = 1.2;
/// Over-fetch factor so boosting can promote hits from outside the top-k.
pub const OVERFETCH: usize = 2;

/// Fixed reply for an empty result set; not an error.
pub const NO_RESULTS_MESSAGE: &str =
    "No relevant entries found. Try different keywords, or make sure the knowledge base has been indexed.";

/// Maximum number of tags rendered per hit.
const MAX_TAGS_SHOWN: usize = 10;

pub struct SearchOrchestrator {
    read_index: Arc<dyn ReadIndex>,
    embedder: Arc<dyn Embedder>,
    routing: Arc<RoutingSlot>,
    source_root: Option<PathBuf>,
}

impl SearchOrchestrator {
    pub fn new(
        read_index: Arc<dyn ReadIndex>,
        embedder: Arc<dyn Embedder>,
        routing: Arc<RoutingSlot>,
        source_root: Option<PathBuf>,
    ) -> Self {
        Self {
            read_index,
            embedder,
            routing,
            source_root,
        }
    }

    /// Run one search and format the result for the tool surface.
    ///
    /// `top_k` is assumed to be clamped by the caller (the RPC layer
    /// clamps to `[1, 10]` with a default of 5).
    pub async fn search(
        &self,
        query: &str,
        current_file_path: Option<&str>,
        top_k: usize,
    ) -> Result<String> {
        let query_vec = self.embedder.embed(query).await?;

        let relevant_domains: Vec<String> = match current_file_path {
            Some(path) => self.routing.get().domains_for_code_path(path),
            None => Vec::new(),
        };

        let raw = self
            .read_index
            .search(query, &query_vec, top_k * OVERFETCH)
            .await?;

        if raw.is_empty() {
            return Ok(NO_RESULTS_MESSAGE.to_string());
        }

        let mut boosted: Vec<SearchHit> = raw
            .into_iter()
            .map(|hit| {
                let score = hit.score * boost_multiplier(&hit.chunk, &relevant_domains);
                SearchHit { score, ..hit }
            })
            .collect();
        boosted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        boosted.truncate(top_k);

        Ok(self.format_results(&boosted))
    }

    fn format_results(&self, hits: &[SearchHit]) -> String {
        let mut out = format!("Found {} relevant entries:\n", hits.len());

        for hit in hits {
            let chunk = &hit.chunk;
            out.push('\n');

            let source = match &self.source_root {
                Some(root) => root.join(&chunk.source_file).display().to_string(),
                None => chunk.source_file.clone(),
            };
            out.push_str(&format!("Source: {}\n", source));

            if !chunk.heading_path.is_empty() {
                out.push_str(&format!("Section: {}\n", chunk.heading_path));
            }
            out.push_str(&format!("Domain: {}\n", chunk.domain));

            if !chunk.tags.is_empty() {
                let shown: Vec<&str> = chunk
                    .tags
                    .iter()
                    .take(MAX_TAGS_SHOWN)
                    .map(String::as_str)
                    .collect();
                out.push_str(&format!("Tags: {}\n", shown.join(", ")));
            }

            out.push('\n');
            out.push_str(&chunk.content);
            out.push('\n');
        }

        out
    }
}

/// Combined boost for a chunk given the caller's relevant domains.
///
/// Both boosts are gated on a non-empty domain set: a search without a
/// current file gets provider-native ranking untouched. A matching-domain
/// instruction chunk compounds to `1.3 × 1.2`.
pub fn boost_multiplier(chunk: &Chunk, relevant_domains: &[String]) -> f64 {
    if relevant_domains.is_empty() {
        return 1.0;
    }

    let mut factor = 1.0;
    if relevant_domains
        .iter()
        .any(|d| d.eq_ignore_ascii_case(&chunk.domain))
    {
        factor *= DOMAIN_BOOST;
    }
    if chunk.is_instruction {
        factor *= INSTRUCTION_BOOST;
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(domain: &str, is_instruction: bool) -> Chunk {
        Chunk {
            id: "0123456789abcdef".to_string(),
            content: "content".to_string(),
            source_file: "a.md".to_string(),
            heading_path: String::new(),
            domain: domain.to_string(),
            tags: vec![],
            related_files: vec![],
            is_instruction,
            embedding: None,
            last_updated: Utc::now(),
            chunk_index: 0,
        }
    }

    #[test]
    fn test_no_domains_means_no_boost() {
        let instruction = chunk("rp", true);
        assert_eq!(boost_multiplier(&instruction, &[]), 1.0);
    }

    #[test]
    fn test_domain_boost_case_insensitive() {
        let domains = vec!["RP".to_string()];
        assert!((boost_multiplier(&chunk("rp", false), &domains) - DOMAIN_BOOST).abs() < 1e-9);
    }

    #[test]
    fn test_instruction_boost_gated_on_domains() {
        let domains = vec!["rp".to_string()];
        // Instruction chunk outside the matched domain still gets the
        // instruction boost once a domain set exists.
        let other = chunk("da", true);
        assert!((boost_multiplier(&other, &domains) - INSTRUCTION_BOOST).abs() < 1e-9);
    }

    #[test]
    fn test_boosts_compound() {
        let domains = vec!["rp".to_string()];
        let both = chunk("rp", true);
        let expected = DOMAIN_BOOST * INSTRUCTION_BOOST;
        assert!((boost_multiplier(&both, &domains) - expected).abs() < 1e-9);
        assert!((expected - 1.56).abs() < 1e-9);
    }
}

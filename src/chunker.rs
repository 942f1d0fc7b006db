//! Heading-aware Markdown chunker.
//!
//! Splits a Markdown document into [`Chunk`]s that respect heading scope and
//! keep fenced code blocks intact. Sections are delimited by `#`–`######`
//! headings; a breadcrumb of heading ancestors travels with every chunk so
//! search results keep their context. Oversized sections are split at fence
//! and paragraph boundaries and greedily repacked up to [`MAX_CHARS`];
//! fragments under [`MIN_CHARS`] after trimming are discarded.
//!
//! Each chunk receives a deterministic id derived from its source path and
//! ordinal, plus extracted tags and cross-referenced Markdown files.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::{normalize_rel_path, Chunk};

/// Upper bound on chunk content length; single atomic blocks may exceed it.
pub const MAX_CHARS: usize = 2000;
/// Chunks shorter than this after trimming are dropped.
pub const MIN_CHARS: usize = 100;

static BACKTICK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([A-Z][A-Za-z0-9_.]+)`").unwrap());
static FILE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_./-]+\.[a-z]{1,5}$").unwrap());
static RELATED_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\]\(([^)]+\.md)\)").unwrap());

/// One heading-scoped section: breadcrumb plus raw content (heading line
/// included at the top).
struct Section {
    heading_path: String,
    content: String,
}

/// Split `text` into chunks for `source_file` (normalized relative path)
/// under `domain`. Returns chunks with contiguous indices starting at 0;
/// fragments below [`MIN_CHARS`] are dropped without consuming an ordinal,
/// keeping surviving ids stable.
pub fn chunk_markdown(text: &str, source_file: &str, domain: &str) -> Vec<Chunk> {
    let source_file = normalize_rel_path(source_file);
    let is_instruction = source_file.to_lowercase().ends_with(".instructions.md");
    let now = Utc::now();

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for section in split_sections(text) {
        for content in split_blocks(&section.content) {
            let trimmed = content.trim();
            if trimmed.chars().count() < MIN_CHARS {
                continue;
            }

            let (tags, related_files) = extract_tags_and_links(trimmed);
            chunks.push(Chunk {
                id: Chunk::make_id(&source_file, chunk_index),
                content: trimmed.to_string(),
                source_file: source_file.clone(),
                heading_path: section.heading_path.clone(),
                domain: domain.to_string(),
                tags,
                related_files,
                is_instruction,
                embedding: None,
                last_updated: now,
                chunk_index,
            });
            chunk_index += 1;
        }
    }

    chunks
}

/// Split the document into heading-scoped sections.
///
/// A stack of `(level, text)` tracks heading ancestry: each heading pops
/// entries at its own level or deeper, then pushes itself. Lines inside
/// fenced code blocks are never treated as headings, so a `# comment` in a
/// shell fence cannot break a section apart. Text before the first heading
/// forms a section with an empty breadcrumb.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();
    let mut breadcrumb = String::new();
    let mut in_fence = false;

    let mut push_section = |breadcrumb: &str, content: &mut String| {
        if !content.trim().is_empty() {
            sections.push(Section {
                heading_path: breadcrumb.to_string(),
                content: std::mem::take(content),
            });
        } else {
            content.clear();
        }
    };

    for raw_line in text.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((level, heading_text)) = parse_heading(line) {
                push_section(&breadcrumb, &mut current);
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, heading_text));
                breadcrumb = stack
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
            }
        }

        current.push_str(line);
        current.push('\n');
    }
    push_section(&breadcrumb, &mut current);

    sections
}

/// Parse `#{1,6} text` heading lines. Returns `(level, text)`; the text may
/// be empty (`"# "` is a legal heading with an empty breadcrumb segment).
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    let text = rest.strip_prefix(' ')?;
    Some((hashes, text.trim().to_string()))
}

/// Split a section into chunk-sized strings.
///
/// Sections at or under [`MAX_CHARS`] pass through whole. Larger sections
/// are decomposed into atomic blocks (fenced code regions, with the
/// paragraph immediately before a fence attached so explanation and code
/// travel together; everything else split at blank lines) and then greedily
/// repacked. A single block over the cap is emitted alone rather than split
/// mid-fence.
fn split_blocks(section: &str) -> Vec<String> {
    if section.trim().chars().count() <= MAX_CHARS {
        return vec![section.to_string()];
    }

    let blocks = atomic_blocks(section);

    let mut out = Vec::new();
    let mut buf = String::new();
    for block in blocks {
        let candidate_len = if buf.is_empty() {
            block.chars().count()
        } else {
            buf.chars().count() + 2 + block.chars().count()
        };

        if candidate_len > MAX_CHARS && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
        }

        if block.chars().count() > MAX_CHARS {
            // Oversized atomic block: never split mid-fence.
            out.push(block);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(&block);
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }

    out
}

/// Decompose a section into atomic blocks: fenced code regions (with their
/// immediately preceding paragraph attached) and blank-line-separated
/// paragraphs.
fn atomic_blocks(section: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Kind {
        Paragraph,
        Code,
    }

    let mut blocks: Vec<(Kind, String)> = Vec::new();
    let mut para = String::new();
    let mut fence: Option<String> = None;

    let mut flush_para = |blocks: &mut Vec<(Kind, String)>, para: &mut String| {
        if !para.trim().is_empty() {
            blocks.push((Kind::Paragraph, para.trim_end().to_string()));
        }
        para.clear();
    };

    for raw_line in section.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if let Some(code) = fence.as_mut() {
            code.push_str(line);
            code.push('\n');
            if line.trim_start().starts_with("```") {
                if let Some(mut code) = fence.take() {
                    let closed_len = code.trim_end().len();
                    code.truncate(closed_len);
                    // Attach the paragraph right before the fence to the code.
                    match blocks.pop() {
                        Some((Kind::Paragraph, prefix)) => {
                            blocks.push((Kind::Code, format!("{}\n\n{}", prefix, code)));
                        }
                        Some(other) => {
                            blocks.push(other);
                            blocks.push((Kind::Code, code));
                        }
                        None => blocks.push((Kind::Code, code)),
                    }
                }
            }
            continue;
        }

        if line.trim_start().starts_with("```") {
            flush_para(&mut blocks, &mut para);
            fence = Some(format!("{}\n", line));
            continue;
        }

        if line.trim().is_empty() {
            flush_para(&mut blocks, &mut para);
        } else {
            para.push_str(line);
            para.push('\n');
        }
    }

    // Unclosed fence runs to the end of the section.
    if let Some(code) = fence {
        blocks.push((Kind::Code, code.trim_end().to_string()));
    }
    flush_para(&mut blocks, &mut para);

    blocks.into_iter().map(|(_, text)| text).collect()
}

/// Extract tags and related Markdown files from chunk content.
///
/// Tags are backtick PascalCase terms (length > 2, no `/`) plus
/// file-path-shaped tokens; both are deduplicated case-insensitively in
/// first-seen order. Related files are the targets of `[...](...md)` links
/// with any `#fragment` stripped and slashes normalized.
fn extract_tags_and_links(content: &str) -> (Vec<String>, Vec<String>) {
    let mut tags = Vec::new();
    let mut seen = HashSet::new();

    for cap in BACKTICK_TAG.captures_iter(content) {
        let term = &cap[1];
        if term.len() > 2 && !term.contains('/') && seen.insert(term.to_lowercase()) {
            tags.push(term.to_string());
        }
    }

    for token in content.split(|c: char| c.is_whitespace()) {
        let token = token.trim_matches(|c| c == '`' || c == '\'' || c == '"');
        if FILE_TOKEN.is_match(token) && seen.insert(token.to_lowercase()) {
            tags.push(token.to_string());
        }
    }

    let mut related = Vec::new();
    let mut seen_links = HashSet::new();
    for cap in RELATED_LINK.captures_iter(content) {
        let target = cap[1].split('#').next().unwrap_or(&cap[1]);
        let target = normalize_rel_path(target);
        if seen_links.insert(target.to_lowercase()) {
            related.push(target);
        }
    }

    (tags, related)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(prefix: &str, len: usize) -> String {
        let mut s = String::from(prefix);
        while s.chars().count() < len {
            s.push_str(" lorem");
        }
        s
    }

    #[test]
    fn test_single_section_single_chunk() {
        let text = format!("# Title\n\n{}\n", pad("Body text.", 150));
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "Title");
        assert!(chunks[0].content.starts_with("# Title"));
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_breadcrumb_stack() {
        let text = format!(
            "# A\n\n{}\n\n## B\n\n{}\n\n### C\n\n{}\n\n## D\n\n{}\n",
            pad("one", 150),
            pad("two", 150),
            pad("three", 150),
            pad("four", 150)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        let paths: Vec<&str> = chunks.iter().map(|c| c.heading_path.as_str()).collect();
        assert_eq!(paths, vec!["A", "A > B", "A > B > C", "A > D"]);
    }

    #[test]
    fn test_prelude_has_empty_breadcrumb() {
        let text = format!("{}\n\n# Later\n\n{}\n", pad("prelude", 150), pad("body", 150));
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks[0].heading_path, "");
        assert_eq!(chunks[1].heading_path, "Later");
    }

    #[test]
    fn test_no_headings_single_empty_breadcrumb() {
        let text = pad("plain text with no headings at all", 200);
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "");
    }

    #[test]
    fn test_short_fragments_discarded_and_indices_contiguous() {
        // Middle section is below MIN_CHARS and must not consume an ordinal.
        let text = format!(
            "# A\n\n{}\n\n# B\n\ntiny\n\n# C\n\n{}\n",
            pad("first", 150),
            pad("third", 150)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].heading_path, "C");
        assert_eq!(chunks[1].id, Chunk::make_id("a.md", 1));
    }

    #[test]
    fn test_fence_stays_atomic_with_preceding_paragraph() {
        // Enough paragraphs to push the section past MAX_CHARS.
        let filler: String = (0..50)
            .map(|i| format!("Paragraph number {} with enough words to count.\n\n", i))
            .collect();
        let text = format!(
            "# Guide\n\n{}Run the setup script:\n\n```bash\necho install\necho done\n```\n\n{}\n",
            filler,
            pad("trailing", 150)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        let with_code: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.content.contains("```bash"))
            .collect();
        assert_eq!(with_code.len(), 1);
        let code_chunk = with_code[0];
        // Explanation travels with the code, and the fence is closed.
        assert!(code_chunk.content.contains("Run the setup script:"));
        assert_eq!(code_chunk.content.matches("```").count(), 2);
    }

    #[test]
    fn test_every_fence_balanced_in_output() {
        let big_code = format!("```text\n{}\n```", pad("x", 3000));
        let text = format!("# H\n\n{}\n\nintro words\n\n{}\n", pad("pre", 300), big_code);
        let chunks = chunk_markdown(&text, "a.md", "root");
        for c in &chunks {
            assert_eq!(c.content.matches("```").count() % 2, 0, "unbalanced fence");
        }
        // The oversized block is emitted alone even though it exceeds the cap.
        assert!(chunks.iter().any(|c| c.content.chars().count() > MAX_CHARS));
    }

    #[test]
    fn test_heading_inside_fence_not_split() {
        let text = format!(
            "# H\n\n{}\n\n```sh\n# not a heading\necho hi\n```\n",
            pad("body", 2100)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks.iter().all(|c| c.heading_path == "H"));
    }

    #[test]
    fn test_crlf_tolerated() {
        let body = pad("windows line endings", 150);
        let text = format!("# Title\r\n\r\n{}\r\n", body);
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "Title");
        assert!(!chunks[0].content.contains('\r'));
    }

    #[test]
    fn test_tag_extraction_backtick_pascal_case() {
        let text = format!(
            "# T\n\nThe `PolicyController` and `RedisCache` handle it; `db` is too short. {}\n",
            pad("", 120)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks[0].tags.contains(&"PolicyController".to_string()));
        assert!(chunks[0].tags.contains(&"RedisCache".to_string()));
        assert!(!chunks[0].tags.iter().any(|t| t == "db"));
    }

    #[test]
    fn test_tag_extraction_file_paths() {
        let text = format!(
            "# T\n\nEdit src/main.rs and 'appsettings.json' to configure. {}\n",
            pad("", 120)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks[0].tags.contains(&"src/main.rs".to_string()));
        assert!(chunks[0].tags.contains(&"appsettings.json".to_string()));
    }

    #[test]
    fn test_tags_dedup_case_insensitive() {
        let text = format!(
            "# T\n\n`RedisCache` then `REDISCACHE` again. {}\n",
            pad("", 120)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        let count = chunks[0]
            .tags
            .iter()
            .filter(|t| t.to_lowercase() == "rediscache")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_related_files_fragment_stripped() {
        let text = format!(
            "# T\n\nSee [setup](guides/setup.md#install) and [api](api.md). {}\n",
            pad("", 120)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(
            chunks[0].related_files,
            vec!["guides/setup.md".to_string(), "api.md".to_string()]
        );
    }

    #[test]
    fn test_instruction_flag_from_path() {
        let body = format!("# T\n\n{}\n", pad("rules", 150));
        let yes = chunk_markdown(&body, "foo.instructions.md", "root");
        let also = chunk_markdown(&body, "Foo.INSTRUCTIONS.md", "root");
        let no = chunk_markdown(&body, "foo.md", "root");
        assert!(yes[0].is_instruction);
        assert!(also[0].is_instruction);
        assert!(!no[0].is_instruction);
    }

    #[test]
    fn test_determinism() {
        let text = format!("# A\n\n{}\n\n## B\n\n{}\n", pad("x", 150), pad("y", 150));
        let a = chunk_markdown(&text, "a.md", "root");
        let b = chunk_markdown(&text, "a.md", "root");
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.content, y.content);
            assert_eq!(x.heading_path, y.heading_path);
        }
    }

    #[test]
    fn test_empty_heading_text_allowed() {
        let text = format!("# \n\n{}\n", pad("content under unnamed heading", 150));
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "");
    }

    #[test]
    fn test_packing_respects_max() {
        let text = format!(
            "# H\n\n{}\n\n{}\n\n{}\n",
            pad("para one", 900),
            pad("para two", 900),
            pad("para three", 900)
        );
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.content.chars().count() <= MAX_CHARS);
        }
    }
}

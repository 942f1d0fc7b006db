//! Domain routing map.
//!
//! The management file (`MemoryExchangeManagement.md`) carries a fenced
//! `yaml` block mapping knowledge-base domains to code-path patterns:
//!
//! ```text
//! ```yaml
//!   rp: ['src/ResourceProvider/', 'src/RP.Common/**/Models/']
//!   da: ['src/DataAccess/']
//! ```
//! ```
//!
//! At query time the current file path is matched against the patterns to
//! pick the domains whose chunks deserve a boost. Declaration order is
//! preserved; each domain is reported at most once.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::normalize_rel_path;

static DOMAIN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(\w+):\s*\[([^\]]+)\]").unwrap());
static QUOTED_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']+)'").unwrap());

/// Ordered (domain, patterns) pairs parsed from the management file.
#[derive(Debug, Clone, Default)]
pub struct RoutingMap {
    entries: Vec<(String, Vec<String>)>,
}

impl RoutingMap {
    /// Parse the first fenced `yaml`/`yml` block of a management Markdown
    /// file. Lines that do not match the `domain: ['path', ...]` shape are
    /// skipped; duplicates and declaration order are preserved.
    pub fn parse(markdown: &str) -> Self {
        let mut entries = Vec::new();
        let mut in_block = false;
        let mut seen_block = false;

        for raw_line in markdown.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            let trimmed = line.trim_start();

            if !in_block {
                if seen_block {
                    break;
                }
                if let Some(info) = trimmed.strip_prefix("```") {
                    let info = info.trim().to_lowercase();
                    if info == "yaml" || info == "yml" {
                        in_block = true;
                        seen_block = true;
                    }
                }
                continue;
            }

            if trimmed.starts_with("```") {
                in_block = false;
                continue;
            }

            if let Some(cap) = DOMAIN_LINE.captures(line) {
                let domain = cap[1].to_string();
                let patterns: Vec<String> = QUOTED_PATH
                    .captures_iter(&cap[2])
                    .map(|p| p[1].to_string())
                    .collect();
                if !patterns.is_empty() {
                    entries.push((domain, patterns));
                }
            }
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Domains whose patterns match `code_path`, in declaration order,
    /// each at most once (first matching pattern wins).
    pub fn domains_for_code_path(&self, code_path: &str) -> Vec<String> {
        let path = normalize_rel_path(code_path).to_lowercase();
        let mut matched = Vec::new();

        for (domain, patterns) in &self.entries {
            if matched.iter().any(|d: &String| d.eq_ignore_ascii_case(domain)) {
                continue;
            }
            if patterns.iter().any(|p| pattern_matches(p, &path)) {
                matched.push(domain.clone());
            }
        }

        matched
    }
}

/// Substring-based pattern match against an already-lowercased path.
///
/// Patterns with `**` split once on the wildcard; the prefix (trailing `/`
/// trimmed) and suffix (trimmed) must each be case-insensitive substrings
/// of the path, and an empty side matches unconditionally. Patterns without
/// `**` match as plain substrings with the trailing `/` trimmed.
fn pattern_matches(pattern: &str, path_lower: &str) -> bool {
    let pattern = normalize_rel_path(pattern).to_lowercase();

    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/').trim();
        let suffix = suffix.trim();
        let prefix_ok = prefix.is_empty() || path_lower.contains(prefix);
        let suffix_ok = suffix.is_empty() || path_lower.contains(suffix);
        prefix_ok && suffix_ok
    } else {
        let needle = pattern.trim_end_matches('/');
        !needle.is_empty() && path_lower.contains(needle)
    }
}

/// Shared handle to the current routing map.
///
/// The map itself is immutable; the indexing pipeline refreshes it by
/// swapping in a whole new [`RoutingMap`] (atomic pointer replacement,
/// never in-place mutation), so concurrent searches always see a
/// consistent snapshot.
#[derive(Default)]
pub struct RoutingSlot {
    current: std::sync::RwLock<std::sync::Arc<RoutingMap>>,
}

impl RoutingSlot {
    pub fn new(map: RoutingMap) -> Self {
        Self {
            current: std::sync::RwLock::new(std::sync::Arc::new(map)),
        }
    }

    pub fn get(&self) -> std::sync::Arc<RoutingMap> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn replace(&self, map: RoutingMap) {
        if let Ok(mut guard) = self.current.write() {
            *guard = std::sync::Arc::new(map);
        }
    }
}

/// Derive a chunk's domain from its source path: the segment after a
/// leading `domains/` (case-insensitive), or `"root"`.
pub fn domain_from_source_path(path: &str) -> String {
    let normalized = normalize_rel_path(path);
    let mut segments = normalized.split('/');

    match (segments.next(), segments.next()) {
        (Some(first), Some(second))
            if first.eq_ignore_ascii_case("domains") && !second.is_empty() =>
        {
            second.to_string()
        }
        _ => "root".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANAGEMENT: &str = r#"# Memory Exchange Management

Routing for code paths:

```yaml
  rp: ['src/ResourceProvider/', 'src/RP.Common/**/Models/']
  da: ['src/DataAccess/']
  rp2: ['src/ResourceProvider/']
```

```yaml
  ignored: ['src/Ignored/']
```
"#;

    #[test]
    fn test_parse_first_block_only() {
        let map = RoutingMap::parse(MANAGEMENT);
        let domains = map.domains_for_code_path("src/Ignored/X.cs");
        assert!(domains.is_empty());
    }

    #[test]
    fn test_declaration_order_preserved() {
        let map = RoutingMap::parse(MANAGEMENT);
        let domains = map.domains_for_code_path("src/ResourceProvider/Controllers/X.cs");
        assert_eq!(domains, vec!["rp".to_string(), "rp2".to_string()]);
    }

    #[test]
    fn test_case_insensitive_substring_match() {
        let map = RoutingMap::parse(MANAGEMENT);
        let domains = map.domains_for_code_path("SRC/DATAACCESS/Repo.cs");
        assert_eq!(domains, vec!["da".to_string()]);
    }

    #[test]
    fn test_double_star_pattern() {
        let map = RoutingMap::parse(MANAGEMENT);
        let hit = map.domains_for_code_path("src/RP.Common/Billing/Models/Invoice.cs");
        assert!(hit.contains(&"rp".to_string()));
        let miss = map.domains_for_code_path("src/RP.Common/Billing/Invoice.cs");
        assert!(!miss.contains(&"rp".to_string()));
    }

    #[test]
    fn test_no_match_returns_empty() {
        let map = RoutingMap::parse(MANAGEMENT);
        assert!(map.domains_for_code_path("tools/build.sh").is_empty());
    }

    #[test]
    fn test_domain_appears_at_most_once() {
        let text = "```yaml\n  rp: ['src/A/', 'src/A/Sub/']\n```\n";
        let map = RoutingMap::parse(text);
        let domains = map.domains_for_code_path("src/A/Sub/File.cs");
        assert_eq!(domains, vec!["rp".to_string()]);
    }

    #[test]
    fn test_yml_info_string_accepted() {
        let text = "```yml\n  da: ['src/DataAccess/']\n```\n";
        let map = RoutingMap::parse(text);
        assert!(!map.is_empty());
    }

    #[test]
    fn test_no_block_yields_empty_map() {
        let map = RoutingMap::parse("# Nothing here\n\nJust prose.\n");
        assert!(map.is_empty());
        assert!(map.domains_for_code_path("src/Anything.cs").is_empty());
    }

    #[test]
    fn test_backslash_paths_normalized() {
        let map = RoutingMap::parse(MANAGEMENT);
        let domains = map.domains_for_code_path("src\\DataAccess\\Repo.cs");
        assert_eq!(domains, vec!["da".to_string()]);
    }

    #[test]
    fn test_domain_from_source_path() {
        assert_eq!(domain_from_source_path("a.md"), "root");
        assert_eq!(domain_from_source_path("guides/a.md"), "root");
        assert_eq!(domain_from_source_path("domains/rp/b.md"), "rp");
        assert_eq!(domain_from_source_path("DOMAINS/rp/b.md"), "rp");
        assert_eq!(domain_from_source_path("domains\\da\\c.md"), "da");
        // A bare "domains" dir with nothing under it maps to root.
        assert_eq!(domain_from_source_path("domains"), "root");
    }
}

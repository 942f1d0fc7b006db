//! Configuration loading and validation.
//!
//! Settings come from a TOML file (default `./memx.toml`), with
//! `MEMX_*` environment variables layered on top — secrets like the Azure
//! keys normally arrive through the environment rather than the file.
//! Command-line flags applied in `main` win over both.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default logical index name.
pub const DEFAULT_INDEX_NAME: &str = "memory-exchange";
/// Default local store file name, resolved under the source root.
pub const DEFAULT_DB_FILE_NAME: &str = "memory_exchange.db";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory of the Markdown corpus. Required for indexing,
    /// watching, and `get_file`.
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// `"local"` (SQLite + on-device embeddings) or `"azure"` (hosted
    /// search + hosted embeddings).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Local store path; defaults to `<source_path>/memory_exchange.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Override for the local embedding model file (or its directory).
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Scanner exclusion globs, applied in addition to the hardcoded
    /// `personal/` exclusion.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Run one indexing pass before serving.
    #[serde(default)]
    pub build_index: bool,

    /// Run the watch loop while serving (implies an indexing pass on
    /// startup).
    #[serde(default)]
    pub watch: bool,

    #[serde(default)]
    pub azure: AzureConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AzureConfig {
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default)]
    pub embedding_key: Option<String>,
    #[serde(default)]
    pub embedding_deployment: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    #[serde(default)]
    pub search_endpoint: Option<String>,
    #[serde(default)]
    pub search_key: Option<String>,
    #[serde(default)]
    pub search_index: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_path: None,
            provider: default_provider(),
            index_name: default_index_name(),
            database_path: None,
            model_path: None,
            exclude_patterns: Vec::new(),
            build_index: false,
            watch: false,
            azure: AzureConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}
fn default_embedding_dims() -> usize {
    1536
}

impl Config {
    /// Minimal configuration for commands that can run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// The local store path: explicit setting, else
    /// `<source_path>/memory_exchange.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.database_path {
            return Some(path.clone());
        }
        self.source_path
            .as_ref()
            .map(|root| root.join(DEFAULT_DB_FILE_NAME))
    }

    /// The corpus root, or a configuration refusal the caller can return.
    pub fn require_source_path(&self) -> Result<&Path> {
        self.source_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("source_path is not configured"))
    }
}

/// Load configuration from `path`, erroring when the file is unreadable
/// or invalid.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: Config =
        toml::from_str(&content).with_context(|| "failed to parse config file")?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Load configuration from `path` when it exists, otherwise start from
/// defaults. Environment overrides apply either way.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.is_file() {
        return load_config(path);
    }
    let mut config = Config::minimal();
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    if let Some(v) = env("MEMX_SOURCE_PATH") {
        config.source_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("MEMX_PROVIDER") {
        config.provider = v;
    }
    if let Some(v) = env("MEMX_INDEX_NAME") {
        config.index_name = v;
    }
    if let Some(v) = env("MEMX_DATABASE_PATH") {
        config.database_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("MEMX_MODEL_PATH") {
        config.model_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("MEMX_AZURE_EMBEDDING_ENDPOINT") {
        config.azure.embedding_endpoint = Some(v);
    }
    if let Some(v) = env("MEMX_AZURE_EMBEDDING_KEY") {
        config.azure.embedding_key = Some(v);
    }
    if let Some(v) = env("MEMX_AZURE_EMBEDDING_DEPLOYMENT") {
        config.azure.embedding_deployment = Some(v);
    }
    if let Some(v) = env("MEMX_AZURE_SEARCH_ENDPOINT") {
        config.azure.search_endpoint = Some(v);
    }
    if let Some(v) = env("MEMX_AZURE_SEARCH_KEY") {
        config.azure.search_key = Some(v);
    }
    if let Some(v) = env("MEMX_AZURE_SEARCH_INDEX") {
        config.azure.search_index = Some(v);
    }
}

fn validate(config: &Config) -> Result<()> {
    match config.provider.as_str() {
        "local" | "azure" => {}
        other => bail!("unknown provider: '{}'. Must be local or azure.", other),
    }

    if config.index_name.trim().is_empty() {
        bail!("index_name must not be empty");
    }

    if config.provider == "azure" {
        let azure = &config.azure;
        if azure.embedding_endpoint.is_none()
            || azure.embedding_key.is_none()
            || azure.embedding_deployment.is_none()
        {
            bail!(
                "azure provider requires azure.embedding_endpoint, azure.embedding_key, \
                 and azure.embedding_deployment (or the matching MEMX_AZURE_* variables)"
            );
        }
        if azure.search_endpoint.is_none() || azure.search_key.is_none() {
            bail!(
                "azure provider requires azure.search_endpoint and azure.search_key \
                 (or the matching MEMX_AZURE_* variables)"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("memx.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::minimal();
        assert_eq!(config.provider, "local");
        assert_eq!(config.index_name, DEFAULT_INDEX_NAME);
        assert!(!config.build_index);
        assert!(!config.watch);
        assert!(config.database_path().is_none());
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
source_path = "/kb"
index_name = "team-kb"
exclude_patterns = ["drafts/**"]
build_index = true
watch = true
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.source_path.as_deref(), Some(Path::new("/kb")));
        assert_eq!(config.index_name, "team-kb");
        assert_eq!(config.exclude_patterns, vec!["drafts/**"]);
        assert!(config.build_index);
        assert!(config.watch);
    }

    #[test]
    fn test_database_path_defaults_under_source() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "source_path = \"/kb\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/kb").join(DEFAULT_DB_FILE_NAME))
        );
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "source_path = \"/kb\"\ndatabase_path = \"/data/kb.db\"\n",
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.database_path(), Some(PathBuf::from("/data/kb.db")));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "provider = \"cloudx\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_azure_provider_requires_connection_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "provider = \"azure\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("azure"));
    }

    #[test]
    fn test_azure_provider_complete() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
provider = "azure"

[azure]
embedding_endpoint = "https://x.openai.azure.com"
embedding_key = "ek"
embedding_deployment = "embed-3"
search_endpoint = "https://x.search.windows.net"
search_key = "sk"
search_index = "kb"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.azure.embedding_dims, 1536);
        assert_eq!(config.azure.search_index.as_deref(), Some("kb"));
    }

    #[test]
    fn test_missing_file_errors_but_default_loader_recovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(&path).is_err());
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.provider, "local");
    }

    #[test]
    fn test_require_source_path() {
        let config = Config::minimal();
        assert!(config.require_source_path().is_err());
    }
}

//! TOML configuration.
//!
//! Every section is optional; absent keys fall back to the defaults below.
//! A handful of deployment values can be overridden from the environment
//! (a `.env` file is honoured by the binary):
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DATABASE_URL` | `db.url` |
//! | `DOCS_PATH` | `docs.root` |
//! | `EMBEDDING_SERVICE_URL` | `embedding.url` |
//! | `REMOTE_EMAIL` | `remote.email` |
//! | `REMOTE_PASSWORD` | `remote.password` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub embedding_service: EmbeddingServiceConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// How many times to poll the database at startup before giving up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_interval_secs")]
    pub connect_retry_interval_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_retries: default_connect_retries(),
            connect_retry_interval_secs: default_connect_retry_interval_secs(),
        }
    }
}

impl DbConfig {
    /// The connection string, or an error naming the missing setting.
    pub fn require_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("db.url (or DATABASE_URL) must be set"))
    }
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_retries() -> u32 {
    30
}
fn default_connect_retry_interval_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            root: default_docs_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_docs_root() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_lines: default_overlap_lines(),
        }
    }
}

fn default_max_chars() -> usize {
    512
}
fn default_overlap_lines() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `http` (the embedding service) or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base of the exponential retry backoff.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Pause between consecutive embedding calls during ingestion.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_embedding_url(),
            model: default_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

fn default_provider() -> String {
    "http".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_request_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Minimum cosine similarity for semantic results.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_limit() -> i64 {
    10
}
fn default_max_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    #[serde(default = "default_health_bind")]
    pub health_bind: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            health_bind: default_health_bind(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_health_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_poll_interval_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingServiceConfig {
    #[serde(default = "default_service_bind")]
    pub bind: String,
    /// `local` (fastembed ONNX model) or `hashing`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_max_texts")]
    pub max_texts: usize,
    #[serde(default = "default_hashing_dims")]
    pub hashing_dims: usize,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_service_bind(),
            backend: default_backend(),
            model: default_local_model(),
            max_texts: default_max_texts(),
            hashing_dims: default_hashing_dims(),
        }
    }
}

fn default_service_bind() -> String {
    "0.0.0.0:8001".to_string()
}
fn default_backend() -> String {
    "local".to_string()
}
fn default_local_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_max_texts() -> usize {
    100
}
fn default_hashing_dims() -> usize {
    384
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            email: None,
            password: None,
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

fn default_remote_base_url() -> String {
    "https://api.graftapp.co".to_string()
}
fn default_remote_timeout_ms() -> u64 {
    10_000
}

/// Read, parse, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn env_config() -> Result<Config> {
    let mut config = Config::default();
    config.apply_env_overrides(|key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.db.url = Some(url);
        }
        if let Some(root) = lookup("DOCS_PATH") {
            self.docs.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("EMBEDDING_SERVICE_URL") {
            self.embedding.url = url;
        }
        if let Some(email) = lookup("REMOTE_EMAIL") {
            self.remote.email = Some(email);
        }
        if let Some(password) = lookup("REMOTE_PASSWORD") {
            self.remote.password = Some(password);
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "http" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be http or disabled.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.search.similarity_threshold) {
        anyhow::bail!("search.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.search.max_limit < 1 {
        anyhow::bail!("search.max_limit must be >= 1");
    }

    if !(1..=config.search.max_limit).contains(&config.search.default_limit) {
        anyhow::bail!(
            "search.default_limit must be between 1 and {}",
            config.search.max_limit
        );
    }

    match config.embedding_service.backend.as_str() {
        "local" | "hashing" => {}
        other => anyhow::bail!(
            "Unknown embedding_service.backend: '{}'. Must be local or hashing.",
            other
        ),
    }

    if config.embedding_service.max_texts == 0 {
        anyhow::bail!("embedding_service.max_texts must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.max_chars, 512);
        assert_eq!(config.embedding.batch_size, 10);
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.search.max_limit, 50);
        assert_eq!(config.embedding_service.max_texts, 100);
        assert_eq!(config.remote.base_url, "https://api.graftapp.co");
        assert!(config.db.url.is_none());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = parse_config(
            r#"
[chunking]
max_chars = 1000

[search]
similarity_threshold = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.chunking.overlap_lines, 3);
        assert_eq!(config.search.similarity_threshold, 0.5);
        assert_eq!(config.search.max_limit, 50);
    }

    #[test]
    fn env_overrides_win() {
        let mut config = parse_config("[db]\nurl = \"postgresql://file\"\n").unwrap();
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgresql://env"),
            ("DOCS_PATH", "/srv/docs"),
            ("EMBEDDING_SERVICE_URL", "http://embed:8001"),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.db.require_url().unwrap(), "postgresql://env");
        assert_eq!(config.docs.root, PathBuf::from("/srv/docs"));
        assert_eq!(config.embedding.url, "http://embed:8001");
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let config = Config::default();
        let err = config.db.require_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_chunk = parse_config("[chunking]\nmax_chars = 0\n").unwrap();
        assert!(validate(&zero_chunk).is_err());

        let bad_provider = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&bad_provider).is_err());

        let bad_threshold = parse_config("[search]\nsimilarity_threshold = 1.5\n").unwrap();
        assert!(validate(&bad_threshold).is_err());

        let bad_limit = parse_config("[search]\ndefault_limit = 80\n").unwrap();
        assert!(validate(&bad_limit).is_err());

        let bad_backend = parse_config("[embedding_service]\nbackend = \"gpu\"\n").unwrap();
        assert!(validate(&bad_backend).is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

//! TOML configuration parsing and validation.
//!
//! Every section has serde defaults, so a config file only needs to name
//! what it changes. [`load_config`] validates chunking and embedding
//! settings up front so a bad value fails at startup rather than on the
//! first reindex.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Knowledge base settings: where documents live and how they are chunked.
#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory that `paths` and document `source` values are relative to.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_paths")]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_k")]
    pub default_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: default_base_dir(),
            paths: default_paths(),
            extensions: default_extensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            index_path: default_index_path(),
            default_k: default_k(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("docs")]
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./data/knowledge.sqlite")
}
fn default_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_cache_path(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache.sqlite")
}
fn default_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_profile")]
    pub default_profile: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile(),
        }
    }
}

fn default_profile() -> String {
    "local".to_string()
}

/// Smart Device Management API settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DevicesConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_sdm_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            base_url: default_sdm_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_sdm_base_url() -> String {
    "https://smartdevicemanagement.googleapis.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Authorization endpoint; `{project_id}` is replaced with `devices.project_id`.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scope: default_scope(),
            state_ttl_secs: default_state_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8787/auth/callback".to_string()
}
fn default_auth_url() -> String {
    "https://nestservices.google.com/partnerconnections/{project_id}/auth".to_string()
}
fn default_token_url() -> String {
    "https://www.googleapis.com/oauth2/v4/token".to_string()
}
fn default_scope() -> String {
    "https://www.googleapis.com/auth/sdm.service".to_string()
}
fn default_state_ttl_secs() -> u64 {
    600
}

impl OAuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }
}

impl Config {
    /// A fully-defaulted configuration, used when no file is available and in tests.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Paths from `[knowledge].paths` resolved against `base_dir`.
    pub fn knowledge_roots(&self) -> Vec<PathBuf> {
        self.knowledge
            .paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.knowledge.base_dir.join(p)
                }
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let k = &config.knowledge;
    if k.chunk_size == 0 {
        bail!("knowledge.chunk_size must be > 0");
    }
    if k.chunk_overlap >= k.chunk_size {
        bail!(
            "knowledge.chunk_overlap ({}) must be smaller than knowledge.chunk_size ({})",
            k.chunk_overlap,
            k.chunk_size
        );
    }
    if k.extensions.is_empty() {
        bail!("knowledge.extensions must list at least one extension");
    }
    if !(1..=10).contains(&k.default_k) {
        bail!("knowledge.default_k must be in [1, 10]");
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match e.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
            if e.dims.is_none() || e.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    e.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    if config.oauth.state_ttl_secs == 0 {
        bail!("oauth.state_ttl_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hearth.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.knowledge.chunk_size, 1000);
        assert_eq!(cfg.knowledge.chunk_overlap, 200);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.oauth.state_ttl_secs, 600);
        assert_eq!(cfg.devices.timeout_secs, 30);
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let (_tmp, path) = write_config("[knowledge]\nchunk_size = 100\nchunk_overlap = 100\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let (_tmp, path) = write_config("[knowledge]\nchunk_size = 0\nchunk_overlap = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let (_tmp, path) = write_config("[embedding]\nprovider = \"openai\"\ndims = 1536\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let (_tmp, path) = write_config("[embedding]\nprovider = \"magic\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/hearth.example.toml");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
        assert_eq!(cfg.pipeline.default_profile, "local");
        assert!(!cfg.oauth.is_configured());
    }

    #[test]
    fn test_knowledge_roots_resolve_against_base_dir() {
        let mut cfg = Config::minimal();
        cfg.knowledge.base_dir = PathBuf::from("/srv/hearth");
        cfg.knowledge.paths = vec![PathBuf::from("docs"), PathBuf::from("/abs/notes")];
        let roots = cfg.knowledge_roots();
        assert_eq!(roots[0], PathBuf::from("/srv/hearth/docs"));
        assert_eq!(roots[1], PathBuf::from("/abs/notes"));
    }
}

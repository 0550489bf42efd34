//! TOML configuration parsing.
//!
//! Every section has defaults, so `Config::default()` is a complete,
//! valid configuration. [`load_config`] reads a file and validates it.
//!
//! ```toml
//! [paths]
//! work_root = "./data/work"
//! jobs_dir = "./data/jobs"
//!
//! [chunking]
//! max_size = 1000
//!
//! [storage]
//! backend = "local"
//!
//! [storage.local]
//! root = "./data/objects"
//! bucket = "packs"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding a hex-encoded Ed25519 seed.
pub const SIGNING_KEY_ENV: &str = "PACK_SIGNING_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub walk: WalkConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            jobs_dir: default_jobs_dir(),
        }
    }
}

fn default_work_root() -> PathBuf {
    PathBuf::from("./data/work")
}
fn default_jobs_dir() -> PathBuf {
    PathBuf::from("./data/jobs")
}

impl PathsConfig {
    /// Per-job ingestion tree produced by the normalizer.
    pub fn ingest_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join("ingest").join(job_id)
    }

    /// Per-job build tree holding `pack.json`, `chunks.ndjson`, and `docs/`.
    pub fn build_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join("build").join(job_id)
    }

    /// Per-job directory holding the finished archive.
    pub fn artifact_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join("artifacts").join(job_id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
        }
    }
}

fn default_max_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalkConfig {
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/__pycache__/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    10
}
fn default_user_agent() -> String {
    format!("packsmith/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout_secs(),
        }
    }
}

fn default_git_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SigningConfig {
    /// Hex-encoded 32-byte Ed25519 seed. `PACK_SIGNING_KEY` takes precedence.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl SigningConfig {
    /// The seed sourced from process configuration: environment first,
    /// then the config file.
    pub fn configured_seed(&self) -> Option<String> {
        std::env::var(SIGNING_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.private_key.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local: LocalStorageConfig::default(),
            s3: None,
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
            bucket: default_bucket(),
        }
    }
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./data/objects")
}
fn default_bucket() -> String {
    "verifiable-ai".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_size == 0 {
        anyhow::bail!("chunking.max_size must be > 0");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }

    if config.git.timeout_secs == 0 {
        anyhow::bail!("git.timeout_secs must be > 0");
    }

    if let Some(ref key) = config.signing.private_key {
        if crate::signing::parse_seed(key).is_err() {
            anyhow::bail!("signing.private_key must be a hex-encoded 32-byte seed");
        }
    }

    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                anyhow::bail!("storage.s3 must be configured when backend is 's3'");
            }
        }
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }

    Ok(())
}

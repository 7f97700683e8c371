use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngramConfig {
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub dispatch: DispatchConfig,
    pub embedding: EmbeddingConfig,
    pub locks: LockConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the bundled SQLite backend files.
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Vector hits below this cosine similarity are dropped.
    pub score_threshold: f64,
    /// Ranking policy used when the caller does not name one.
    pub default_policy: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-backend search timeout.
    pub backend_timeout_ms: u64,
    /// Overall bound on one dispatch, even if no single backend timed out.
    pub overall_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    /// When true, an embedding failure fails the whole context write instead
    /// of degrading to `embedding_status = "failed"`.
    pub strict: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            retrieval: RetrievalConfig::default(),
            dispatch: DispatchConfig::default(),
            embedding: EmbeddingConfig::default(),
            locks: LockConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_engram_dir().to_string_lossy().into_owned();
        Self { data_dir }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            score_threshold: 0.3,
            default_policy: "default".into(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 2_000,
            overall_timeout_ms: 5_000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            strict: false,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { default_ttl_secs: 30 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DATA_DIR,
    /// ENGRAM_STRICT_EMBEDDING, ENGRAM_CACHE_TTL_SECS).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENGRAM_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("ENGRAM_STRICT_EMBEDDING") {
            self.embedding.strict = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("ENGRAM_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                self.cache.ttl_secs = secs;
            }
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.backend_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.overall_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.locks.default_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

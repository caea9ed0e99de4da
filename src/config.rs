use crate::browser::BrowserConfig;
use crate::error::ConfigError;
use crate::models::MediaType;
use crate::sources::{ApiEndpoint, ScrapeTarget};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default = "default_categories")]
    pub categories: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as the `api_key` query parameter; omitted when empty
    #[serde(default)]
    pub api_key: String,

    /// Prepended to relative poster paths
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Timeout for one upstream call in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// How often expired entries are purged in the background
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// How a category is acquired
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SourceConfig {
    Api(ApiEndpoint),
    Scrape(ScrapeTarget),
}

impl SourceConfig {
    pub fn media_type(&self) -> MediaType {
        match self {
            SourceConfig::Api(endpoint) => endpoint.media_type,
            SourceConfig::Scrape(target) => target.media_type,
        }
    }
}

fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_base_url() -> String { "https://api.themoviedb.org/3".to_string() }
fn default_image_prefix() -> String { "https://image.tmdb.org/t/p/w500".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_max_entries() -> usize { 100 }
fn default_ttl() -> u64 { 300 }
fn default_sweep_interval() -> u64 { 60 }

fn default_categories() -> BTreeMap<String, SourceConfig> {
    let mut categories = BTreeMap::new();
    categories.insert(
        "movies".to_string(),
        SourceConfig::Api(ApiEndpoint::new(MediaType::Movie, "trending/movie/day")),
    );
    categories.insert(
        "tv".to_string(),
        SourceConfig::Api(ApiEndpoint::new(MediaType::Tv, "trending/tv/day")),
    );
    categories
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            image_prefix: default_image_prefix(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_seconds: default_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            browser: BrowserConfig::default(),
            categories: default_categories(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Config {
    /// Load from `CATALOG_CONFIG` or `config.toml`, then apply environment
    /// overrides. Falls back to defaults when the file is missing or broken.
    pub fn load() -> Self {
        let path = std::env::var("CATALOG_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            match Self::from_path(&path) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path);
                    config
                }
                Err(e) => {
                    log::warn!("{}; using defaults", e);
                    Self::default()
                }
            }
        } else {
            log::info!("No configuration file at {}, using defaults", path);
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CATALOG_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let numeric = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Ignoring {}={}: not a number", name, raw);
                    None
                }
            }
        };

        if let Some(bind) = lookup("CATALOG_BIND") {
            self.server.bind = bind;
        }
        if let Some(base_url) = lookup("CATALOG_API_BASE_URL") {
            self.upstream.base_url = base_url;
        }
        if let Some(api_key) = lookup("CATALOG_API_KEY").or_else(|| lookup("TMDB_API_KEY")) {
            self.upstream.api_key = api_key;
        }
        if let Some(prefix) = lookup("CATALOG_IMAGE_PREFIX") {
            self.upstream.image_prefix = prefix;
        }
        if let Some(max_entries) = numeric("CATALOG_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = max_entries as usize;
        }
        if let Some(ttl) = numeric("CATALOG_CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }
        if let Some(pool_size) = numeric("CATALOG_BROWSER_POOL_SIZE") {
            self.browser.pool_size = pool_size as usize;
        }
        if let Some(timeout) = numeric("CATALOG_TIMEOUT_SECS") {
            self.upstream.timeout_secs = timeout;
            self.browser.timeout_secs = timeout;
        }

        let names: Vec<String> = self.categories.keys().cloned().collect();
        for name in names {
            let var = format!("CATALOG_SCRAPE_URL_{}", name.to_uppercase());
            let Some(url) = lookup(&var) else { continue };

            let source = match self.categories.get(&name) {
                Some(SourceConfig::Scrape(target)) => ScrapeTarget {
                    url,
                    ..target.clone()
                },
                Some(other) => ScrapeTarget::new(other.media_type(), url),
                None => continue,
            };
            log::info!("Category {} switched to scraping by {}", name, var);
            self.categories.insert(name, SourceConfig::Scrape(source));
        }
    }

    /// Reject settings that would only fail at request time
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid("no categories configured".to_string()));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be at least 1".to_string()));
        }
        reqwest::Url::parse(&self.upstream.base_url)
            .map_err(|e| ConfigError::Invalid(format!("upstream.base_url: {}", e)))?;

        for (name, source) in &self.categories {
            let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
            if name.is_empty() || !name.chars().all(valid_char) {
                return Err(ConfigError::Invalid(format!("category name {:?}", name)));
            }
            match source {
                SourceConfig::Api(endpoint) if endpoint.endpoint.trim().is_empty() => {
                    return Err(ConfigError::Invalid(format!("category {}: empty endpoint", name)));
                }
                SourceConfig::Scrape(target) => target
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("category {}: {}", name, e)))?,
                SourceConfig::Api(_) => {}
            }
        }
        Ok(())
    }

    pub fn uses_browser(&self) -> bool {
        self.categories
            .values()
            .any(|source| matches!(source, SourceConfig::Scrape(_)))
    }
}

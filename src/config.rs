use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Process configuration.
///
/// Layered lowest to highest: built-in defaults, `config.toml`, then
/// `CORPFRONT_`-prefixed environment variables where `__` separates the
/// section from the field (`CORPFRONT_RETRY__MAX_TIMES=5`). The bare
/// `DATABASE_URL` variable is honored as well and wins over everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub loglevel: String,
    /// Shared secret for `/api/admin/*`. Empty disables every admin route.
    pub admin_key: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            loglevel: "info".to_string(),
            admin_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Used when `url` is PostgreSQL and unreachable at startup.
    pub fallback_url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_recycle_secs: u64,
    pub pre_ping: bool,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub statement_timeout_ms: u64,
    pub sslmode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://dashboard.db?mode=rwc".to_string(),
            fallback_url: "sqlite://dashboard.db?mode=rwc".to_string(),
            pool_size: 15,
            max_overflow: 5,
            pool_recycle_secs: 300,
            pre_ping: true,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            statement_timeout_ms: 30_000,
            sslmode: "require".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn is_postgres(&self) -> bool {
        is_postgres_url(&self.url)
    }
}

pub fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_times: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Lower-cased substrings that mark an otherwise unclassified error as transient.
    pub transient_markers: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_times: 3,
            min_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: true,
            transient_markers: [
                "ssl",
                "connection",
                "closed",
                "reset",
                "pending rollback",
                "broken pipe",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub config_cache_ttl_secs: u64,
    pub slideshow_interval_secs: u32,
    /// Prefix for `/uploads/...` links when an upload row has no storage URL.
    pub public_base_url: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            config_cache_ttl_secs: 30,
            slideshow_interval_secs: 5,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("CORPFRONT_").split("__"))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "database.url".into()),
            )
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        let mut cfg: Config = figment.extract()?;
        cfg.database.url = cfg.database.url.trim().to_string();
        if cfg.database.url.is_empty() {
            cfg.database.url = cfg.database.fallback_url.clone();
        }
        Ok(cfg)
    }
}

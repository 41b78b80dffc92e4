use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Ranking source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Origin of the ranking site; relative links on the page resolve against it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ranking_path")]
    pub ranking_path: String,

    /// Fixed identity header. When unset a browser identity is picked per client.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Unset means the transport default (no explicit timeout).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP adapter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://auto.danawa.com".to_string()
}
fn default_ranking_path() -> String {
    "/auto/".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/auto_rank.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ranking_path: default_ranking_path(),
            user_agent: None,
            timeout_secs: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("AUTORANK").separator("__"))
            .build()?;

        let app_cfg = cfg.try_deserialize().unwrap_or_else(|e| {
            warn!("Unusable configuration ({}), falling back to defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(
                "[storage]\ndb_path = \"/tmp/x.duckdb\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let app: AppConfig = cfg.try_deserialize().unwrap();
        assert_eq!(app.storage.db_path, PathBuf::from("/tmp/x.duckdb"));
        assert!(app.storage.run_migrations);
        assert_eq!(app.scraper.base_url, "https://auto.danawa.com");
        assert_eq!(app.server.bind, "127.0.0.1:5000");
        assert!(app.scraper.timeout_secs.is_none());
    }
}

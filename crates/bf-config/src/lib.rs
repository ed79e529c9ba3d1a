//! # bf-config
//!
//! Layered runtime configuration: built-in defaults, then an optional
//! `config/forum.{toml,yaml,json}` file, then `FORUM__SECTION__KEY`
//! environment variables (a `.env` file is read first when present).

use std::path::PathBuf;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "FORUM";
pub const DEFAULT_CONFIG_FILE: &str = "config/forum";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker threads; actix picks one per core when absent
    pub workers: Option<usize>,
    /// Browser origin allowed by CORS; any origin when absent
    pub allowed_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:besties_forum.db`
    #[serde(deserialize_with = "secret_string")]
    pub url: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root_path: PathBuf,
    pub url_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForumConfig {
    pub default_page_size: usize,
    pub vote_retry_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub forum: ForumConfig,
    pub log: LogConfig,
}

fn secret_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

impl AppConfig {
    /// Reads `.env`, then the default file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::load_from(DEFAULT_CONFIG_FILE, Self::environment())
    }

    /// `FORUM__SERVER__PORT=9000` overrides `server.port`.
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn load_from(file: &str, env: Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite:besties_forum.db")?
            .set_default("storage.root_path", "./data/uploads")?
            .set_default("storage.url_prefix", "/static/uploads")?
            .set_default("forum.default_page_size", 20)?
            .set_default("forum.vote_retry_limit", 3)?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?
            .add_source(File::with_name(file).required(false))
            .add_source(env)
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.forum.default_page_size == 0 {
            return Err(ConfigError::Invalid("forum.default_page_size must be at least 1".to_string()));
        }
        if self.storage.url_prefix.is_empty() {
            return Err(ConfigError::Invalid("storage.url_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::environment().source(Some(source))
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let config = AppConfig::load_from("does/not/exist", env(&[])).unwrap();
        assert_eq!(config.bind_address(), ("127.0.0.1".to_string(), 8080));
        assert_eq!(config.database.url.expose_secret(), "sqlite:besties_forum.db");
        assert_eq!(config.forum.default_page_size, 20);
        assert_eq!(config.forum.vote_retry_limit, 3);
        assert!(config.server.allowed_origin.is_none());
        assert!(!config.log.json);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = AppConfig::load_from(
            "does/not/exist",
            env(&[
                ("FORUM__SERVER__PORT", "9000"),
                ("FORUM__DATABASE__URL", "sqlite::memory:"),
                ("FORUM__LOG__JSON", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url.expose_secret(), "sqlite::memory:");
        assert!(config.log.json);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = AppConfig::load_from("does/not/exist", env(&[("FORUM__FORUM__DEFAULT_PAGE_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn database_url_is_redacted_in_debug_output() {
        let config = AppConfig::load_from("does/not/exist", env(&[])).unwrap();
        assert!(!format!("{config:?}").contains("besties_forum.db"));
    }
}

//! Layered configuration.
//!
//! Sources, highest priority first:
//! 1. `FAIRSHARE_*` environment variables (`__` separates sections, so
//!    `FAIRSHARE_DATABASE__URI` sets `database.uri`)
//! 2. `fairshare.toml` in the working directory
//! 3. Built-in defaults

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::split::SplitPolicy;

const MAX_SCALE: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub split: SplitPolicy,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            uri: "mongodb://localhost:27017".to_string(),
            name: "FairShare".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared with trusted backend callers. Empty disables service access.
    pub service_token: String,
    /// Key the sign-in gateway signs session tokens with.
    pub session_secret: String,
    pub max_age_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            service_token: String::new(),
            session_secret: String::new(),
            max_age_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 3,
            delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env` first, then the regular sources.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load()
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("fairshare.toml"))
            .merge(Env::prefixed("FAIRSHARE_").split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.session_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.session_secret must be set".to_string(),
            ));
        }
        if self.split.scale > MAX_SCALE {
            return Err(ConfigError::Invalid(format!(
                "split.scale {} exceeds {}",
                self.split.scale, MAX_SCALE
            )));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.attempts must be at least 1".to_string(),
            ));
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
    use figment::Jail;

    #[test]
    fn defaults_need_a_session_secret() {
        Jail::expect_with(|_jail| {
            let err = Config::load().unwrap_err();
            assert!(err.to_string().contains("session_secret"));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_sections() {
        Jail::expect_with(|jail| {
            jail.set_env("FAIRSHARE_AUTH__SESSION_SECRET", "s3cret");
            jail.set_env("FAIRSHARE_SERVER__PORT", "9000");
            jail.set_env("FAIRSHARE_SPLIT__SCALE", "0");
            let config = Config::load().expect("config");
            assert_eq!(config.auth.session_secret, "s3cret");
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.split.scale, 0);
            assert_eq!(config.database.name, "FairShare");
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_layered_under_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fairshare.toml",
                r#"
                [auth]
                session_secret = "from-file"

                [retry]
                attempts = 5
                delay_ms = 10
                "#,
            )?;
            jail.set_env("FAIRSHARE_RETRY__ATTEMPTS", "2");
            let config = Config::load().expect("config");
            assert_eq!(config.auth.session_secret, "from-file");
            assert_eq!(config.retry.attempts, 2);
            assert_eq!(config.retry.delay_ms, 10);
            Ok(())
        });
    }

    #[test]
    fn oversized_scale_is_rejected() {
        let mut config = Config::default();
        config.auth.session_secret = "x".to_string();
        config.split.scale = 18;
        assert!(config.validate().is_err());
    }
}

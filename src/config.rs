use std::env;

use crate::error::ConfigError;

/// Configuration for the [`crate::gateway::Gateway`] and everything built on
/// top of it. Mirrors the knobs enumerated in spec §6.5.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    /// Prepended to every backend key. Default empty.
    pub prefix: String,
    pub connection_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_interval_secs: u64,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: 0,
            password: None,
            prefix: String::new(),
            connection_timeout_secs: 5,
            max_retries: 3,
            retry_interval_secs: 1,
        }
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_connection_timeout_secs(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_interval_secs(mut self, secs: u64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    /// Loads configuration from `LEANMQ_*` environment variables, falling
    /// back to the defaults documented in spec §6.5 when a variable is
    /// absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("LEANMQ_REDIS_HOST", "127.0.0.1");
        let port = parse_env_or_default("LEANMQ_REDIS_PORT", 6379u16)?;
        let db = parse_env_or_default("LEANMQ_REDIS_DB", 0i64)?;
        let password = env::var("LEANMQ_REDIS_PASSWORD").ok();
        let prefix = env_or_default("LEANMQ_PREFIX", "");
        let connection_timeout_secs = parse_env_or_default("LEANMQ_CONNECTION_TIMEOUT_SECS", 5)?;
        let max_retries = parse_env_or_default("LEANMQ_MAX_RETRIES", 3)?;
        let retry_interval_secs = parse_env_or_default("LEANMQ_RETRY_INTERVAL_SECS", 1)?;

        Ok(Self {
            host,
            port,
            db,
            password,
            prefix,
            connection_timeout_secs,
            max_retries,
            retry_interval_secs,
        })
    }

    /// The `redis://` connection string this config resolves to.
    pub fn redis_url(&self) -> String {
        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        format!("redis://{auth}{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 6379)
    }
}

/// Supervisor and Dispatcher-facing knobs (spec §6.5's remaining entries).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub process_interval_secs: u64,
    pub auto_start: bool,
    pub worker_thread_timeout_secs: u64,
    pub install_signals: bool,
    pub batch_size: usize,
    pub block_for_seconds: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            process_interval_secs: 1,
            auto_start: false,
            worker_thread_timeout_secs: 5,
            install_signals: true,
            batch_size: 10,
            block_for_seconds: Some(1),
        }
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_config_matches_spec_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.connection_timeout_secs, 5);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_interval_secs, 1);
        assert_eq!(cfg.prefix, "");
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = GatewayConfig::new("redis.internal", 6380)
            .with_db(2)
            .with_password("secret")
            .with_prefix("app_")
            .with_max_retries(5);
        assert_eq!(cfg.db, 2);
        assert_eq!(cfg.password.as_deref(), Some("secret"));
        assert_eq!(cfg.prefix, "app_");
        assert_eq!(cfg.max_retries, 5);
    }

    #[test]
    fn redis_url_includes_password_when_present() {
        let cfg = GatewayConfig::new("localhost", 6379).with_password("hunter2");
        assert_eq!(cfg.redis_url(), "redis://:hunter2@localhost:6379/0");
    }

    #[test]
    fn redis_url_without_password() {
        let cfg = GatewayConfig::new("localhost", 6379);
        assert_eq!(cfg.redis_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn service_config_defaults_match_spec() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.process_interval_secs, 1);
        assert!(!cfg.auto_start);
        assert_eq!(cfg.worker_thread_timeout_secs, 5);
        assert!(cfg.install_signals);
    }
}

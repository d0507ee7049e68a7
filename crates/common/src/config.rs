//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::AppError;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Health endpoint configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Publishing provider configuration.
    pub provider: ProviderConfig,
    /// Job worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Fixed-interval task configuration.
    #[serde(default)]
    pub periodic: PeriodicConfig,
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis host.
    #[serde(default = "default_redis_host")]
    pub host: String,
    /// Redis port.
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub db: u8,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// External publishing provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// OAuth client id used for refresh-token exchanges.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Base URL of the business profile REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// OAuth token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Timeout applied to every provider request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Language code attached to published posts.
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

/// Job worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Queue name; also the Redis key namespace of the queue.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Number of concurrent worker slots.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum attempts per enqueued job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Upper bound on any retry delay.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Backoff growth factor.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Idle poll interval when no job is due.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a fetched job stays leased before it counts as stalled.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// How often stalled leases are swept.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Upper bound on a single handler run.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

/// Fixed-interval task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicConfig {
    /// Whether review polling runs.
    #[serde(default = "default_true")]
    pub review_poll_enabled: bool,
    /// Review polling interval.
    #[serde(default = "default_review_poll_interval_secs")]
    pub review_poll_interval_secs: u64,
    /// Whether auto-replies run.
    #[serde(default = "default_true")]
    pub auto_reply_enabled: bool,
    /// Auto-reply interval.
    #[serde(default = "default_auto_reply_interval_secs")]
    pub auto_reply_interval_secs: u64,
    /// Maximum reviews answered per auto-reply run.
    #[serde(default = "default_auto_reply_batch_size")]
    pub auto_reply_batch_size: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3001
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_redis_port() -> u16 {
    6379
}

fn default_redis_prefix() -> String {
    "gbp".to_string()
}

fn default_api_base_url() -> String {
    "https://mybusiness.googleapis.com/v4".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    20
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_queue_name() -> String {
    "publish-post".to_string()
}

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_secs() -> u64 {
    30
}

const fn default_max_backoff_secs() -> u64 {
    900
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_lease_secs() -> u64 {
    120
}

const fn default_reap_interval_secs() -> u64 {
    30
}

const fn default_handler_timeout_secs() -> u64 {
    90
}

const fn default_review_poll_interval_secs() -> u64 {
    1800
}

const fn default_auto_reply_interval_secs() -> u64 {
    600
}

const fn default_auto_reply_batch_size() -> u64 {
    25
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            prefix: default_redis_prefix(),
        }
    }
}

impl RedisConfig {
    /// Connection URL built from host, port, password and database index.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl ProviderConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    /// Idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lease length.
    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Stalled-lease sweep interval.
    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// Per-attempt handler timeout.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            review_poll_enabled: true,
            review_poll_interval_secs: default_review_poll_interval_secs(),
            auto_reply_enabled: true,
            auto_reply_interval_secs: default_auto_reply_interval_secs(),
            auto_reply_batch_size: default_auto_reply_batch_size(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `GBP_ENV`)
    /// 4. Environment variables with `GBP__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("GBP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("GBP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("GBP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the worker cannot start with.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, value) in [
            ("provider.api_base_url", &self.provider.api_base_url),
            ("provider.token_url", &self.provider.token_url),
        ] {
            let url = Url::parse(value)
                .map_err(|e| AppError::Config(format!("{name} is not a valid URL: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AppError::Config(format!("{name} must be http(s), got {value}")));
            }
        }
        if self.provider.client_id.trim().is_empty() {
            return Err(AppError::Config("provider.client_id is not set".to_string()));
        }
        if self.worker.concurrency == 0 {
            return Err(AppError::Config("worker.concurrency must be at least 1".to_string()));
        }
        if self.worker.lease() <= self.worker.handler_timeout() {
            return Err(AppError::Config(
                "worker.lease_secs must exceed worker.handler_timeout_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url_without_password() {
        let redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_redis_url_with_password() {
        let redis = RedisConfig {
            host: "queue.internal".to_string(),
            port: 6380,
            password: Some("s3cret".to_string()),
            db: 2,
            prefix: "gbp".to_string(),
        };
        assert_eq!(redis.url(), "redis://:s3cret@queue.internal:6380/2");
    }

    #[test]
    fn test_worker_defaults() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.max_attempts, 3);
        assert_eq!(worker.concurrency, 4);
        assert!(worker.handler_timeout() > Duration::from_secs(2 * 20));
        assert!(worker.lease() > worker.handler_timeout());
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join(format!("gbp-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("worker.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "postgres://localhost/gbp"

[provider]
client_id = "client"
client_secret = "secret"

[worker]
concurrency = 8
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.provider.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.provider.token_url, "https://oauth2.googleapis.com/token");
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let dir = std::env::temp_dir().join(format!("gbp-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("worker.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "postgres://localhost/gbp"

[provider]
client_id = "client"
client_secret = "secret"
token_url = "not a url"
"#,
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("provider.token_url"));

        config.provider.token_url = "https://oauth2.googleapis.com/token".to_string();
        config.worker.lease_secs = config.worker.handler_timeout_secs;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}

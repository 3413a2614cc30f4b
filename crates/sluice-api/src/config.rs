//! Configuration management for the sluice gateway.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sluice_delivery::{HttpTransportConfig, RetryPolicy};
use sluice_ingest::{bulk::ImportConfig, ServiceConfig};

const CONFIG_FILE: &str = "sluice.toml";

/// Complete gateway configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`sluice.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use sluice_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Gateway will bind to {}:{}", config.host, config.http_port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Listen address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port.
    ///
    /// Environment variable: `HTTP_PORT`
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// `Retry-After` value sent with queue-full responses.
    ///
    /// Environment variable: `RETRY_AFTER_SECONDS`
    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,

    // Logging
    /// Default log filter; `RUST_LOG` takes precedence when set.
    ///
    /// Environment variable: `LOG_LEVEL`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `pretty` or `json`.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // Durable log
    /// Comma-separated base URLs of the durable log.
    ///
    /// Environment variable: `LOG_ENDPOINTS`
    #[serde(default = "default_log_endpoints")]
    pub log_endpoints: String,
    /// Primary topic.
    ///
    /// Environment variable: `LOG_TOPIC`
    #[serde(default = "default_log_topic")]
    pub log_topic: String,
    /// Dead-letter topic.
    ///
    /// Environment variable: `LOG_DLQ_TOPIC`
    #[serde(default = "default_log_dlq_topic")]
    pub log_dlq_topic: String,
    /// Write attempts per record, including the first.
    ///
    /// Environment variable: `LOG_MAX_ATTEMPTS`
    #[serde(default = "default_log_max_attempts")]
    pub log_max_attempts: u32,
    /// Backoff before the second attempt in milliseconds; doubles after.
    ///
    /// Environment variable: `LOG_RETRY_BACKOFF_MS`
    #[serde(default = "default_log_retry_backoff_ms")]
    pub log_retry_backoff_ms: u64,
    /// Timeout for a single write attempt in milliseconds.
    ///
    /// Every primary attempt plus the dead-letter write must fit inside
    /// `delivery_timeout_ms`.
    ///
    /// Environment variable: `LOG_WRITE_TIMEOUT_MS`
    #[serde(default = "default_log_write_timeout_ms")]
    pub log_write_timeout_ms: u64,

    // Ingestion
    /// Deadline for delivering one event in milliseconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_MS`
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Number of delivery workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Admission queue capacity.
    ///
    /// Environment variable: `QUEUE_SIZE`
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Sustained admission rate in requests per second.
    ///
    /// Environment variable: `RATE_LIMIT_RPS`
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    /// Token-bucket capacity.
    ///
    /// Environment variable: `RATE_LIMIT_BURST`
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    // Bulk import
    /// CSV file to import instead of serving HTTP.
    ///
    /// Environment variable: `IMPORT_FILE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_file: Option<String>,
    /// Directory for import checkpoints.
    ///
    /// Environment variable: `IMPORT_STATE_DIR`
    #[serde(default = "default_import_state_dir")]
    pub import_state_dir: String,
    /// Concurrent import publishers.
    ///
    /// Environment variable: `IMPORT_WORKERS`
    #[serde(default = "default_import_workers")]
    pub import_workers: usize,
    /// Rows per checkpoint.
    ///
    /// Environment variable: `IMPORT_BATCH_SIZE`
    #[serde(default = "default_import_batch_size")]
    pub import_batch_size: usize,
    /// Rows per second, 0 for unlimited.
    ///
    /// Environment variable: `IMPORT_RATE_LIMIT`
    #[serde(default)]
    pub import_rate_limit: f64,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type or fails validation.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Durable-log endpoints, trimmed, without empty entries.
    pub fn endpoints(&self) -> Vec<String> {
        self.log_endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Convert to the ingestion service configuration.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            worker_count: self.worker_pool_size,
            queue_capacity: self.queue_size,
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
        }
    }

    /// Convert to a transport configuration for `topic`.
    pub fn to_transport_config(&self, topic: &str) -> HttpTransportConfig {
        HttpTransportConfig {
            endpoints: self.endpoints(),
            topic: topic.to_string(),
            write_timeout: Duration::from_millis(self.log_write_timeout_ms),
            retry: RetryPolicy::new(
                self.log_max_attempts,
                Duration::from_millis(self.log_retry_backoff_ms),
            ),
            ..HttpTransportConfig::default()
        }
    }

    /// Convert to an import configuration when `IMPORT_FILE` is set.
    pub fn to_import_config(&self) -> Option<ImportConfig> {
        self.import_file.as_ref().map(|path| ImportConfig {
            workers: self.import_workers,
            batch_size: self.import_batch_size,
            rate_limit: self.import_rate_limit,
            ..ImportConfig::new(path.clone())
        })
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.http_port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("http_port must be greater than 0");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.queue_size == 0 {
            anyhow::bail!("queue_size must be greater than 0");
        }

        if self.log_max_attempts == 0 {
            anyhow::bail!("log_max_attempts must be greater than 0");
        }

        if self.endpoints().is_empty() {
            anyhow::bail!("log_endpoints must list at least one endpoint");
        }

        if self.log_topic.trim().is_empty() || self.log_dlq_topic.trim().is_empty() {
            anyhow::bail!("log_topic and log_dlq_topic must not be empty");
        }

        if !self.rate_limit_rps.is_finite() || self.rate_limit_rps < 0.0 {
            anyhow::bail!("rate_limit_rps must be a non-negative number");
        }

        if !self.import_rate_limit.is_finite() || self.import_rate_limit < 0.0 {
            anyhow::bail!("import_rate_limit must be a non-negative number");
        }

        if self.import_workers == 0 || self.import_batch_size == 0 {
            anyhow::bail!("import_workers and import_batch_size must be greater than 0");
        }

        let worst_case_write = self.to_transport_config(&self.log_topic).worst_case_write();
        let delivery_timeout = Duration::from_millis(self.delivery_timeout_ms);
        if worst_case_write.saturating_mul(2) >= delivery_timeout {
            anyhow::bail!(
                "delivery_timeout_ms ({}ms) must exceed two worst-case log writes ({}ms each: \
                 log_max_attempts x log_write_timeout_ms plus backoff) so a failed primary can \
                 still reach the dead-letter topic",
                self.delivery_timeout_ms,
                worst_case_write.as_millis()
            );
        }

        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "pretty" | "json") {
            anyhow::bail!("log_format must be \"pretty\" or \"json\"");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_seconds: default_request_timeout_seconds(),
            retry_after_seconds: default_retry_after_seconds(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_endpoints: default_log_endpoints(),
            log_topic: default_log_topic(),
            log_dlq_topic: default_log_dlq_topic(),
            log_max_attempts: default_log_max_attempts(),
            log_retry_backoff_ms: default_log_retry_backoff_ms(),
            log_write_timeout_ms: default_log_write_timeout_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            queue_size: default_queue_size(),
            rate_limit_rps: default_rate_limit_rps(),
            rate_limit_burst: default_rate_limit_burst(),
            import_file: None,
            import_state_dir: default_import_state_dir(),
            import_workers: default_import_workers(),
            import_batch_size: default_import_batch_size(),
            import_rate_limit: 0.0,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_retry_after_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_endpoints() -> String {
    "http://localhost:8082".to_string()
}

fn default_log_topic() -> String {
    "events".to_string()
}

fn default_log_dlq_topic() -> String {
    "events-dlq".to_string()
}

fn default_log_max_attempts() -> u32 {
    3
}

fn default_log_retry_backoff_ms() -> u64 {
    100
}

fn default_log_write_timeout_ms() -> u64 {
    600
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_queue_size() -> usize {
    1000
}

fn default_rate_limit_rps() -> f64 {
    1000.0
}

fn default_rate_limit_burst() -> u32 {
    100
}

fn default_import_state_dir() -> String {
    ".sluice-import".to_string()
}

fn default_import_workers() -> usize {
    4
}

fn default_import_batch_size() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            self.originals.entry(key.to_string()).or_insert_with(|| env::var(key).ok());
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for (key, original) in &self.originals {
                match original {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.log_topic, "events");
        assert_eq!(config.log_dlq_topic, "events-dlq");
        assert_eq!(config.log_max_attempts, 3);
        assert_eq!(config.worker_pool_size, 10);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.rate_limit_rps, 1000.0);
        assert_eq!(config.rate_limit_burst, 100);
        assert_eq!(config.retry_after_seconds, 5);
        assert_eq!(config.import_file, None);
        assert_eq!(config.log_write_timeout_ms, 600);
    }

    #[test]
    fn default_write_budget_leaves_room_for_dead_letter() {
        let config = Config::default();
        let worst_case = config.to_transport_config(&config.log_topic).worst_case_write();

        assert!(worst_case * 2 < Duration::from_millis(config.delivery_timeout_ms));
    }

    #[test]
    fn slow_write_timeout_from_env_is_rejected() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("LOG_WRITE_TIMEOUT_MS", "10000");

        let error = Config::load().unwrap_err();

        assert!(format!("{error:#}").contains("delivery_timeout_ms"));
    }

    #[test]
    fn env_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("HTTP_PORT", "9090");
        guard.set_var("WORKER_POOL_SIZE", "3");
        guard.set_var("QUEUE_SIZE", "20");
        guard.set_var("RATE_LIMIT_RPS", "2.5");
        guard.set_var("RATE_LIMIT_BURST", "7");
        guard.set_var("LOG_ENDPOINTS", "http://a:8082, http://b:8082");
        guard.set_var("LOG_DLQ_TOPIC", "dead");

        let config = Config::load().expect("Config should load with env overrides");

        assert_eq!(config.http_port, 9090);
        assert_eq!(config.worker_pool_size, 3);
        assert_eq!(config.queue_size, 20);
        assert_eq!(config.rate_limit_rps, 2.5);
        assert_eq!(config.rate_limit_burst, 7);
        assert_eq!(config.endpoints(), vec!["http://a:8082", "http://b:8082"]);
        assert_eq!(config.log_dlq_topic, "dead");
    }

    #[test]
    fn invalid_env_value_fails_to_load() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("QUEUE_SIZE", "0");

        assert!(Config::load().is_err());
    }

    #[test]
    fn invalid_config_validation_fails() {
        let cases: Vec<fn(&mut Config)> = vec![
            |c| c.http_port = 0,
            |c| c.worker_pool_size = 0,
            |c| c.queue_size = 0,
            |c| c.log_max_attempts = 0,
            |c| c.log_endpoints = " , ".to_string(),
            |c| c.log_topic = String::new(),
            |c| c.rate_limit_rps = -1.0,
            |c| c.rate_limit_rps = f64::NAN,
            |c| c.import_batch_size = 0,
            |c| c.log_format = "xml".to_string(),
            |c| c.log_write_timeout_ms = 10_000,
            |c| c.delivery_timeout_ms = 4_000,
            |c| c.log_max_attempts = 10,
        ];

        for mutate in cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "expected rejection of {config:?}");
        }
    }

    #[test]
    fn conversions_carry_values() {
        let config = Config {
            worker_pool_size: 4,
            queue_size: 64,
            delivery_timeout_ms: 250,
            log_max_attempts: 5,
            log_retry_backoff_ms: 20,
            log_write_timeout_ms: 1_500,
            import_file: Some("rows.csv".to_string()),
            import_rate_limit: 50.0,
            ..Config::default()
        };

        let service = config.to_service_config();
        assert_eq!(service.worker_count, 4);
        assert_eq!(service.queue_capacity, 64);
        assert_eq!(service.delivery_timeout, Duration::from_millis(250));

        let transport = config.to_transport_config("events-dlq");
        assert_eq!(transport.topic, "events-dlq");
        assert_eq!(transport.retry.max_attempts, 5);
        assert_eq!(transport.retry.base_delay, Duration::from_millis(20));
        assert_eq!(transport.write_timeout, Duration::from_millis(1_500));

        let import = config.to_import_config().expect("import configured");
        assert_eq!(import.path, "rows.csv");
        assert_eq!(import.rate_limit, 50.0);
        assert!(Config::default().to_import_config().is_none());
    }

    #[test]
    fn socket_address_parsing() {
        let config = Config { host: "127.0.0.1".to_string(), http_port: 9000, ..Config::default() };

        let addr = config.parse_server_addr().expect("Should parse socket address");

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 9000);
    }
}

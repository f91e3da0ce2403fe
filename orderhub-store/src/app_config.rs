use serde::Deserialize;
use std::env;

/// Smallest cache bound the service will start with.
pub const MIN_CACHED_ORDERS: usize = 5;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_orders: usize,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub dead_letter_topic: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            conflict_retries: default_conflict_retries(),
        }
    }
}

fn default_request_timeout() -> u64 { 10 }
fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_ttl() -> u64 { 3600 }
fn default_connect_attempts() -> u32 { 5 }
fn default_connect_backoff() -> u64 { 1000 }
fn default_conflict_retries() -> u32 { 1 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `ORDERHUB_REDIS__MAX_ORDERS=50`
            .add_source(config::Environment::with_prefix("ORDERHUB").separator("__"))
            .build()?;

        Self::from_source(s)
    }

    /// Deserializes an already-built source and checks cross-field rules.
    pub fn from_source(source: config::Config) -> Result<Self, config::ConfigError> {
        let cfg: Config = source.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.redis.max_orders < MIN_CACHED_ORDERS {
            return Err(config::ConfigError::Message(format!(
                "redis.max_orders must be at least {}, got {}",
                MIN_CACHED_ORDERS, self.redis.max_orders
            )));
        }
        if self.redis.connect_attempts == 0 {
            return Err(config::ConfigError::Message(
                "redis.connect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Distributed backend configuration.
///
/// `url` is optional on purpose: its absence (or unreachability at
/// startup) selects the in-process delivery backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Stream session tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Per-session event buffer capacity (drop-oldest beyond this)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Reconnection hint sent in every frame's `retry:` field
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    /// How long one queue wait may block before timers are checked
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Keep-alive `ping` event interval (consumes an event id)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Heartbeat comment interval (no event id, defeats proxy buffering)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

/// Environment variable source.
///
/// The section separator is a double underscore so multi-word field names
/// survive the split: `REDIS__PROBE_TIMEOUT_MS` maps to
/// `redis.probe_timeout_ms`, `STREAM__CHANNEL_CAPACITY` to
/// `stream.channel_capacity`. A single-underscore separator would cut
/// those field names apart and silently ignore the override.
fn env_source() -> Environment {
    Environment::default()
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("server.cors_origins")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_channel_capacity() -> usize {
    100
}

fn default_retry_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    20_000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("stream.channel_capacity", 100)?
            .set_default("stream.retry_ms", 3000)?
            .set_default("stream.poll_interval_ms", 1000)?
            .set_default("stream.ping_interval_ms", 30_000)?
            .set_default("stream.heartbeat_interval_ms", 20_000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__HOST, SERVER__PORT, JWT__SECRET, REDIS__URL, etc.
            .add_source(env_source());

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            retry_ms: default_retry_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

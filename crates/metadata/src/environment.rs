use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use sqx_schema::{DataType, Exchange, Instrument, Symbol};

use crate::connection::ConnectionConfig;
use crate::error::MetadataError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    #[default]
    Nats,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

/// Default HTTP bind host for the health server
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default HTTP port for the health server
pub const DEFAULT_PORT: u16 = 8080;
/// Default broker request/reply timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
/// Default per-subscriber bus queue
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_data_type() -> DataType {
    DataType::Trade
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, MetadataError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| MetadataError::Validation(format!("app address: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_level")]
    pub level: String,
    /// Append to this file instead of stdout
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_level(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Control-plane connection used for request/reply
    pub url: String,
    #[serde(default)]
    pub transport: TransportType,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// One durable publisher per connection string
    #[serde(default)]
    pub publishers: Vec<String>,
}

impl NatsConfig {
    pub fn publisher_configs(&self) -> Result<Vec<ConnectionConfig>, MetadataError> {
        self.publishers
            .iter()
            .map(|raw| ConnectionConfig::parse(raw))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub exchange: Exchange,
    pub instrument: Instrument,
    /// Canonical `BASE-QUOTE` form
    pub symbol: String,
    #[serde(rename = "type", default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub testnet: bool,
    /// Overrides the exchange endpoint constant
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Credential source, e.g. `env:API_KEY,API_SECRET`
    #[serde(default)]
    pub keys: Option<String>,
}

impl FeedConfig {
    pub fn symbol(&self) -> Result<Symbol, MetadataError> {
        self.symbol
            .parse()
            .map_err(|e| MetadataError::Validation(format!("feed symbol: {}", e)))
    }

    /// Configured name, or `exchange-instrument-base-quote` lowercased
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}-{}-{}", self.exchange, self.instrument, self.symbol)
                .to_ascii_lowercase(),
        }
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if self.exchange.is_unknown() {
            return Err(MetadataError::Validation("feed exchange cannot be UNKNOWN".into()));
        }
        if self.instrument.is_unknown() {
            return Err(MetadataError::Validation("feed instrument cannot be UNKNOWN".into()));
        }
        if self.data_type.is_unknown() {
            return Err(MetadataError::Validation("feed type cannot be UNKNOWN".into()));
        }
        self.symbol()?;
        Ok(())
    }
}

/// Top-level document passed with `-c <path>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    pub nats: NatsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Environment {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, MetadataError> {
        let env: Environment = serde_yaml::from_str(content)?;
        env.validate()?;
        Ok(env)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.nats.transport == TransportType::Nats && self.nats.url.is_empty() {
            return Err(MetadataError::Validation("nats.url cannot be empty".into()));
        }
        if self.nats.request_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "nats.request_timeout_secs must be positive".into(),
            ));
        }
        self.nats.publisher_configs()?;
        self.app.socket_addr()?;
        for feed in &self.feeds {
            feed.validate()?;
        }
        Ok(())
    }
}

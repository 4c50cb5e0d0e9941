//! Broker connection strings
//!
//! `nats://[user[:pass]@]host[:port]?stream=<name>[&subject=<subject>]`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::MetadataError;

pub const DEFAULT_NATS_PORT: u16 = 4222;

const PARAM_STREAM: &str = "stream";
const PARAM_SUBJECT: &str = "subject";

/// Parsed broker endpoint with its query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Parse and validate a connection string. A leading `@` is tolerated.
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MetadataError::Connection(
                "connection string cannot be empty".to_string(),
            ));
        }
        let raw = raw.strip_prefix('@').unwrap_or(raw);

        let url = Url::parse(raw)
            .map_err(|e| MetadataError::Connection(format!("{}: {}", raw, e)))?;

        if url.scheme() != "nats" {
            return Err(MetadataError::Connection(format!(
                "unsupported scheme {:?}, only nats:// is supported",
                url.scheme()
            )));
        }

        let host = url.host_str().unwrap_or_default().to_string();
        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(ToString::to_string);
        let password = url.password().map(ToString::to_string);

        let mut params = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            // first value wins
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }

        let config = Self {
            host,
            port: url.port().unwrap_or(DEFAULT_NATS_PORT),
            username,
            password,
            params,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.host.is_empty() {
            return Err(MetadataError::Connection("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(MetadataError::Connection(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        match self.params.get(PARAM_STREAM) {
            None => {
                return Err(MetadataError::Connection(
                    "stream parameter is required".to_string(),
                ))
            }
            Some(s) if s.is_empty() => {
                return Err(MetadataError::Connection(
                    "stream parameter cannot be empty".to_string(),
                ))
            }
            Some(_) => {}
        }
        if let Some(subject) = self.params.get(PARAM_SUBJECT) {
            if subject.is_empty() {
                return Err(MetadataError::Connection(
                    "subject parameter cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// JetStream stream name
    pub fn stream(&self) -> &str {
        self.params.get(PARAM_STREAM).map(String::as_str).unwrap_or_default()
    }

    /// Subject override; publishers fall back to `<kind>.<symbol-lower>`
    pub fn subject(&self) -> Option<&str> {
        self.params.get(PARAM_SUBJECT).map(String::as_str)
    }

    pub fn param<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params.get(key).map(String::as_str).unwrap_or(default)
    }

    pub fn int_param(&self, key: &str, default: i64) -> Result<i64, MetadataError> {
        match self.params.get(key) {
            Some(v) => v.parse().map_err(|_| {
                MetadataError::Connection(format!("invalid integer parameter {}={}", key, v))
            }),
            None => Ok(default),
        }
    }

    pub fn bool_param(&self, key: &str, default: bool) -> Result<bool, MetadataError> {
        match self.params.get(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(MetadataError::Connection(format!(
                "invalid boolean parameter {}={}",
                key, v
            ))),
            None => Ok(default),
        }
    }

    /// `nats://host:port`, the address handed to the client
    pub fn server_url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Full connection string with parameters in sorted order
    pub fn to_nats_url(&self) -> String {
        self.render(self.password.as_deref())
    }

    /// Same as [`Self::to_nats_url`] with the password masked, for logs
    pub fn redacted(&self) -> String {
        self.render(self.password.as_ref().map(|_| "***"))
    }

    fn render(&self, password: Option<&str>) -> String {
        let mut out = String::from("nats://");
        if let Some(user) = &self.username {
            out.push_str(user);
            if let Some(pass) = password {
                out.push(':');
                out.push_str(pass);
            }
            out.push('@');
        }
        out.push_str(&self.host);
        out.push(':');
        out.push_str(&self.port.to_string());

        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| {
                let value: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
                format!("{}={}", k, value)
            })
            .collect();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query.join("&"));
        }
        out
    }
}

impl FromStr for ConnectionConfig {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

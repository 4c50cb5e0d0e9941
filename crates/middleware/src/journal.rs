//! Limits-retention stream model shared by the NATS and in-memory transports.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::JournalError;

/// Retention for market data streams
pub const MARKET_DATA_MAX_AGE: Duration = Duration::from_secs(60 * 60);
pub const MARKET_DATA_MAX_MESSAGES: i64 = 1000;
pub const MARKET_DATA_MAX_BYTES: i64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStorage {
    File,
    Memory,
}

/// Stream definition. Limits of zero or below mean unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StreamStorage,
    pub max_age: Duration,
    pub max_messages: i64,
    pub max_bytes: i64,
}

impl StreamSpec {
    /// File-backed, limits retention, discard old: 1h, 1000 messages or 1 MiB.
    pub fn market_data(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            storage: StreamStorage::File,
            max_age: MARKET_DATA_MAX_AGE,
            max_messages: MARKET_DATA_MAX_MESSAGES,
            max_bytes: MARKET_DATA_MAX_BYTES,
        }
    }

    pub fn with_max_messages(mut self, max_messages: i64) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: i64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Stored stream message
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub sequence: u64,
    /// Unix millis at append
    pub timestamp: i64,
    pub subject: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

impl JournalEntry {
    /// Bytes counted against `max_bytes`
    pub fn size(&self) -> usize {
        self.subject.len()
            + self.payload.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// Snapshot of a stream's retained window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// Append-only stream with limits retention
#[async_trait]
pub trait Journal: Send + Sync {
    fn spec(&self) -> &StreamSpec;

    /// Append and return the assigned sequence; the oldest entries are
    /// discarded once any limit is exceeded.
    async fn append(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<u64, JournalError>;

    /// First retained entry with `sequence >= from` whose subject matches `filter`
    async fn read_from(&self, from: u64, filter: &str)
        -> Result<Option<JournalEntry>, JournalError>;

    async fn info(&self) -> JournalInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_limits() {
        let spec = StreamSpec::market_data("FEED", vec!["trade.>".to_string()]);
        assert_eq!(spec.storage, StreamStorage::File);
        assert_eq!(spec.max_age, Duration::from_secs(3600));
        assert_eq!(spec.max_messages, 1000);
        assert_eq!(spec.max_bytes, 1_048_576);
    }

    #[test]
    fn test_entry_size_counts_headers() {
        let entry = JournalEntry {
            sequence: 1,
            timestamp: 1_700_000_000_000,
            subject: "trade.btcusdt".to_string(),
            payload: Bytes::from_static(b"1234"),
            headers: HashMap::from([("k".to_string(), "vv".to_string())]),
        };
        assert_eq!(entry.size(), 13 + 4 + 3);
    }
}

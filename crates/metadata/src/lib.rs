//! sqx-metadata: configuration documents for the feed runtime

pub mod connection;
pub mod environment;
pub mod error;

pub use connection::{ConnectionConfig, DEFAULT_NATS_PORT};
pub use environment::{
    AppConfig, BusConfig, Environment, FeedConfig, LogFormat, LoggerConfig, NatsConfig,
    TransportType,
};
pub use error::MetadataError;

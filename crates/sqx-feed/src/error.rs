use sqx_connector::{ConnectorError, ResolverError};
use sqx_metadata::MetadataError;
use sqx_middleware::{FactoryError, TransportError};
use thiserror::Error;

pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_RUNTIME: u8 = 2;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("configuration error: {0}")]
    Config(#[from] MetadataError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("credential error: {0}")]
    Credentials(#[from] ResolverError),
    #[error("adapter error: {0}")]
    Adapter(#[from] ConnectorError),
    #[error("middleware error: {0}")]
    Middleware(#[from] FactoryError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("health server failed: {0}")]
    Server(#[source] std::io::Error),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FeedError {
    /// 1 for anything fixable in the config document, 2 otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            FeedError::Config(_) | FeedError::Logging(_) | FeedError::Credentials(_) => EXIT_CONFIG,
            FeedError::Adapter(e) => match e {
                ConnectorError::UnsupportedInstrument { .. }
                | ConnectorError::AdapterNotFound { .. }
                | ConnectorError::InvalidEndpoint(_) => EXIT_CONFIG,
                ConnectorError::Transient(_) | ConnectorError::Closed => EXIT_RUNTIME,
            },
            FeedError::Middleware(FactoryError::Config(_)) => EXIT_CONFIG,
            FeedError::Middleware(_)
            | FeedError::Transport(_)
            | FeedError::Server(_)
            | FeedError::Fatal(_) => EXIT_RUNTIME,
        }
    }
}

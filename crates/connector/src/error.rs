use sqx_schema::{DataType, Exchange, Instrument};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("{exchange} adapter does not support {instrument}")]
    UnsupportedInstrument {
        exchange: Exchange,
        instrument: Instrument,
    },
    #[error("no adapter registered for ({exchange}, {kind})")]
    AdapterNotFound { exchange: Exchange, kind: DataType },
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Dial failures, read timeouts and peer closes; absorbed by the session loop
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("subscription closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectorError::Transient(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}

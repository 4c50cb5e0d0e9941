use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("stream failed: {0}")]
    StreamFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("timeout")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("append failed: {0}")]
    AppendFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("stream not found: {0}")]
    StreamNotFound(String),
}

impl From<JournalError> for TransportError {
    fn from(e: JournalError) -> Self {
        TransportError::StreamFailed(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("subscriber queue full on topic {topic}")]
    SubscriberFull { topic: String },
    #[error("bus closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publisher unavailable: {endpoint}")]
    PublisherUnavailable { endpoint: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

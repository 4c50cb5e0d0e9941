use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TransportError;
use crate::journal::StreamSpec;

/// Message envelope with metadata
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    /// Inbox to answer on, set for request/reply traffic
    pub reply: Option<String>,
    pub timestamp: u64,
    /// Stream sequence for durable deliveries
    pub sequence: Option<u64>,
}

/// Subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive next message (blocks until available)
    async fn next(&mut self) -> Result<TransportMessage, TransportError>;

    /// Acknowledge a durable delivery by its stream sequence
    async fn ack(&self, sequence: u64) -> Result<(), TransportError>;

    /// Unsubscribe and close
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Broker abstraction: core pub/sub, request/reply and limits-retention streams
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message (fire and forget)
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publish with headers
    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Subscribe to a subject pattern (`*` and `>` wildcards)
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError>;

    /// Request/reply pattern with timeout
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<TransportMessage, TransportError>;

    /// Create the stream if missing; an existing stream is left as is
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), TransportError>;

    /// Publish into a stream and wait for the broker ack, returning the stream sequence
    async fn publish_durable(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<u64, TransportError>;

    /// Durable consumer with explicit acks. Unacked messages are redelivered
    /// to the next subscription under the same consumer name.
    async fn durable_subscribe(
        &self,
        stream: &str,
        consumer: &str,
        filter: &str,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    fn is_connected(&self) -> bool;
}

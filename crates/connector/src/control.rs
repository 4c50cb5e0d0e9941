//! Request/reply control plane on `control.<feed>`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqx_middleware::{SubjectBuilder, Transport, TransportError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handle::SubscriptionHandle;
use crate::metrics::FeedMetrics;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Status,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub feed: String,
    pub state: String,
    pub received: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Pong { feed: String },
    Status(FeedStatus),
    Error { message: String },
}

/// Answers control requests for one feed
pub struct ControlResponder {
    feed: String,
    handle: SubscriptionHandle,
    metrics: FeedMetrics,
}

impl ControlResponder {
    pub fn new(feed: impl Into<String>, handle: SubscriptionHandle) -> Self {
        let feed = feed.into();
        Self {
            metrics: FeedMetrics::new(feed.clone()),
            feed,
            handle,
        }
    }

    pub fn handle_request(&self, payload: &[u8]) -> ControlReply {
        match serde_json::from_slice::<ControlCommand>(payload) {
            Ok(ControlCommand::Ping) => ControlReply::Pong {
                feed: self.feed.clone(),
            },
            Ok(ControlCommand::Status) => ControlReply::Status(FeedStatus {
                feed: self.feed.clone(),
                state: self.handle.state().to_string(),
                received: self.metrics.received(),
                dropped: self.metrics.dropped_total(),
                reconnects: self.metrics.reconnects(),
            }),
            Err(e) => ControlReply::Error {
                message: format!("invalid command: {}", e),
            },
        }
    }

    /// Subscribe to the control subject and answer until cancelled
    pub async fn spawn(
        self,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, TransportError> {
        let subject = SubjectBuilder::new().control(&self.feed);
        let mut subscription = transport.subscribe(&subject).await?;
        info!(feed = %self.feed, subject = %subject, "Control responder listening");

        Ok(tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = subscription.next() => msg,
                };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(feed = %self.feed, error = %e, "Control subscription failed");
                        break;
                    }
                };
                let Some(reply_to) = msg.reply else {
                    debug!(subject = %msg.subject, "Control message without reply subject");
                    continue;
                };
                let reply = self.handle_request(&msg.payload);
                let body = match serde_json::to_vec(&reply) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode control reply");
                        continue;
                    }
                };
                if let Err(e) = transport.publish(&reply_to, Bytes::from(body)).await {
                    warn!(feed = %self.feed, error = %e, "Failed to send control reply");
                }
            }
            let _ = subscription.unsubscribe().await;
        }))
    }
}

/// Issues control requests against running feeds
pub struct ControlClient {
    transport: Arc<dyn Transport>,
    subjects: SubjectBuilder,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subjects: SubjectBuilder::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn request(
        &self,
        feed: &str,
        command: ControlCommand,
    ) -> Result<ControlReply, TransportError> {
        let payload = serde_json::to_vec(&command)
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;
        let response = self
            .transport
            .request(&self.subjects.control(feed), Bytes::from(payload), self.timeout)
            .await?;
        serde_json::from_slice(&response.payload)
            .map_err(|e| TransportError::RequestFailed(format!("invalid control reply: {}", e)))
    }

    pub async fn ping(&self, feed: &str) -> Result<ControlReply, TransportError> {
        self.request(feed, ControlCommand::Ping).await
    }

    pub async fn status(&self, feed: &str) -> Result<ControlReply, TransportError> {
        self.request(feed, ControlCommand::Status).await
    }
}

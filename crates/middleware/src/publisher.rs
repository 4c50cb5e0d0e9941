//! Durable publishing into broker streams.
//!
//! Each [`DurablePublisher`] owns one writer task per broker endpoint. Calls
//! are handed to the writer and wait for the broker ack. After a broker
//! error the writer reconnects with backoff; until the stream is reachable
//! again every call fails fast with `PublisherUnavailable` and nothing is
//! buffered.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use sqx_metadata::ConnectionConfig;
use sqx_schema::{encode_into, DataType, Trade};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{PublishError, TransportError};
use crate::journal::StreamSpec;
use crate::latency::{elapsed_nanos, now_tsc};
use crate::nats::SubjectBuilder;
use crate::transport::Transport;

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_MESSAGE_TYPE: &str = "Message-Type";
/// Broker-side de-duplication key
pub const HEADER_MSG_ID: &str = "Nats-Msg-Id";
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Requests queued ahead of the writer; callers wait for their ack anyway
const WRITER_QUEUE: usize = 256;
/// Initial capacity for serialization buffer (a trade record is ~60 bytes)
const BUFFER_INITIAL_CAPACITY: usize = 128;

thread_local! {
    /// Reused across publish calls to avoid a heap allocation per encode.
    static ENCODE_BUFFER: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(BUFFER_INITIAL_CAPACITY));
}

/// Headers attached to every trade publish
pub fn trade_headers(trade: &Trade) -> HashMap<String, String> {
    HashMap::from([
        (HEADER_CONTENT_TYPE.to_string(), CONTENT_TYPE_PROTOBUF.to_string()),
        (
            HEADER_MESSAGE_TYPE.to_string(),
            DataType::Trade.subject_token().to_string(),
        ),
        (HEADER_MSG_ID.to_string(), trade.id_str()),
    ])
}

fn encode_trade(trade: &Trade) -> Bytes {
    ENCODE_BUFFER.with(|buf| {
        let mut buffer = buf.borrow_mut();
        buffer.clear();
        encode_into(trade, &mut buffer);
        Bytes::copy_from_slice(&buffer)
    })
}

/// Stream definition for one publisher connection string: every data kind
/// plus the subject override when it falls outside them.
pub fn stream_spec_for(config: &ConnectionConfig) -> StreamSpec {
    let subjects = SubjectBuilder::new();
    let mut bound: Vec<String> = DataType::ALL
        .iter()
        .filter(|kind| !kind.is_unknown())
        .map(|kind| subjects.all(*kind))
        .collect();
    if let Some(subject) = config.subject() {
        if !bound
            .iter()
            .any(|p| crate::nats::subject_matches(p, subject))
        {
            bound.push(subject.to_string());
        }
    }
    StreamSpec::market_data(config.stream(), bound)
}

struct PublishRequest {
    subject: String,
    payload: Bytes,
    headers: HashMap<String, String>,
    reply: oneshot::Sender<Result<u64, PublishError>>,
}

/// Writer for one broker endpoint
pub struct DurablePublisher {
    endpoint: String,
    subject_override: Option<String>,
    available: Arc<AtomicBool>,
    requests: mpsc::Sender<PublishRequest>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl DurablePublisher {
    /// Create the stream and start the writer task
    pub async fn start(
        transport: Arc<dyn Transport>,
        config: &ConnectionConfig,
        backoff: Backoff,
        parent: &CancellationToken,
    ) -> Result<Self, PublishError> {
        let spec = stream_spec_for(config);
        Self::start_with_spec(transport, spec, config.redacted(), config.subject(), backoff, parent)
            .await
    }

    pub async fn start_with_spec(
        transport: Arc<dyn Transport>,
        spec: StreamSpec,
        endpoint: String,
        subject_override: Option<&str>,
        backoff: Backoff,
        parent: &CancellationToken,
    ) -> Result<Self, PublishError> {
        transport.ensure_stream(&spec).await?;
        info!(endpoint = %endpoint, stream = %spec.name, subjects = ?spec.subjects, "durable publisher ready");

        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        let available = Arc::new(AtomicBool::new(true));
        let cancel = parent.child_token();

        let writer = Writer {
            transport,
            spec,
            endpoint: endpoint.clone(),
            available: Arc::clone(&available),
            backoff,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(writer.run(rx));

        Ok(Self {
            endpoint,
            subject_override: subject_override.map(ToString::to_string),
            available,
            requests: tx,
            cancel,
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Endpoint with credentials masked
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn unavailable(&self) -> PublishError {
        PublishError::PublisherUnavailable {
            endpoint: self.endpoint.clone(),
        }
    }

    /// Publish and wait for the stream sequence. `subject` is replaced by the
    /// connection string's subject when one is configured.
    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<u64, PublishError> {
        if !self.is_available() {
            return Err(self.unavailable());
        }

        let (reply, response) = oneshot::channel();
        let request = PublishRequest {
            subject: self
                .subject_override
                .clone()
                .unwrap_or_else(|| subject.to_string()),
            payload,
            headers,
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())?
    }

    /// Stop the writer; queued requests are answered with `PublisherUnavailable`
    pub async fn close(&self) {
        self.available.store(false, Ordering::Release);
        self.cancel.cancel();
        if let Some(handle) = self.writer.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(endpoint = %self.endpoint, error = %e, "publisher writer task failed");
            }
        }
    }
}

struct Writer {
    transport: Arc<dyn Transport>,
    spec: StreamSpec,
    endpoint: String,
    available: Arc<AtomicBool>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl Writer {
    fn reject(&self, request: PublishRequest) {
        let _ = request.reply.send(Err(PublishError::PublisherUnavailable {
            endpoint: self.endpoint.clone(),
        }));
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PublishRequest>) {
        loop {
            let request = tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let start = now_tsc();
            match self
                .transport
                .publish_durable(&request.subject, request.payload, request.headers)
                .await
            {
                Ok(sequence) => {
                    debug!(
                        subject = %request.subject,
                        sequence,
                        latency_ns = elapsed_nanos(start, now_tsc()),
                        "published"
                    );
                    let _ = request.reply.send(Ok(sequence));
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, subject = %request.subject, error = %e, "publish failed, reconnecting");
                    self.available.store(false, Ordering::Release);
                    let _ = request.reply.send(Err(PublishError::Transport(e)));
                    if !self.recover(&mut rx).await {
                        break;
                    }
                }
            }
        }

        self.available.store(false, Ordering::Release);
        rx.close();
        while let Ok(request) = rx.try_recv() {
            self.reject(request);
        }
        debug!(endpoint = %self.endpoint, "publisher writer stopped");
    }

    /// Back off until the stream answers again. Requests arriving meanwhile
    /// are rejected. Returns false when cancelled.
    async fn recover(&mut self, rx: &mut mpsc::Receiver<PublishRequest>) -> bool {
        self.backoff.reset();
        loop {
            let delay = self.backoff.next_delay();
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    _ = &mut sleep => break,
                    request = rx.recv() => match request {
                        Some(request) => self.reject(request),
                        None => return false,
                    },
                }
            }

            match self.check().await {
                Ok(()) => {
                    info!(endpoint = %self.endpoint, attempts = self.backoff.attempts(), "publisher recovered");
                    self.backoff.reset();
                    self.available.store(true, Ordering::Release);
                    return true;
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, delay_ms = delay.as_millis() as u64, error = %e, "publisher still unavailable");
                }
            }
        }
    }

    async fn check(&self) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.ensure_stream(&self.spec).await
    }
}

/// One durable publisher per configured broker endpoint
pub struct PubManager {
    publishers: Vec<DurablePublisher>,
    subjects: SubjectBuilder,
}

impl PubManager {
    pub fn new(publishers: Vec<DurablePublisher>) -> Self {
        Self {
            publishers,
            subjects: SubjectBuilder::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    pub fn publishers(&self) -> &[DurablePublisher] {
        &self.publishers
    }

    /// Publish to every endpoint in order; the first failure stops the
    /// remaining endpoints and is returned.
    pub async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), PublishError> {
        for publisher in &self.publishers {
            publisher
                .publish(subject, payload.clone(), headers.clone())
                .await?;
        }
        Ok(())
    }

    /// Encode a trade and publish it on `trade.<symbol-lower>`
    pub async fn publish_trade(&self, trade: &Trade) -> Result<(), PublishError> {
        let subject = self.subjects.trade(&trade.symbol);
        self.publish(&subject, encode_trade(trade), trade_headers(trade))
            .await
    }

    pub async fn close(&self) {
        for publisher in &self.publishers {
            publisher.close().await;
        }
    }
}

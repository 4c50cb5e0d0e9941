use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};

use crate::error::TransportError;
use crate::journal::{Journal, StreamSpec};
use crate::latency::now_tsc;
use crate::memory::journal::InMemoryJournal;
use crate::nats::subject_matches;
use crate::transport::{Subscription, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 1024;
const INBOX_PREFIX: &str = "_INBOX.";

/// Acked sequences of one durable consumer. `floor` is the highest
/// sequence below which everything has been acked.
#[derive(Default)]
struct ConsumerState {
    floor: u64,
    acked: BTreeSet<u64>,
}

impl ConsumerState {
    fn ack(&mut self, sequence: u64) {
        if sequence <= self.floor {
            return;
        }
        self.acked.insert(sequence);
        while self.acked.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
    }
}

/// In-process broker for tests and single-process deployments. Subscriptions
/// are keyed by pattern; streams are emulated by [`InMemoryJournal`].
pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    streams: DashMap<String, Arc<InMemoryJournal>>,
    consumers: DashMap<(String, String), Arc<Mutex<ConsumerState>>>,
    sequence: AtomicU64,
    connected: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            streams: DashMap::new(),
            consumers: DashMap::new(),
            sequence: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate a broker outage; publishes fail with `NotConnected` while down
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn journal(&self, stream: &str) -> Option<Arc<InMemoryJournal>> {
        self.streams.get(stream).map(|j| Arc::clone(j.value()))
    }

    #[inline]
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn get_or_create_channel(&self, pattern: &str) -> broadcast::Sender<TransportMessage> {
        self.channels
            .entry(pattern.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }

    /// Fan a message out to every pattern that matches; returns receiver count
    fn deliver(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
        reply: Option<String>,
    ) -> usize {
        let msg = TransportMessage {
            subject: subject.to_string(),
            payload,
            headers,
            reply,
            timestamp: now_tsc(),
            sequence: Some(self.next_sequence()),
        };
        self.channels
            .iter()
            .filter(|entry| subject_matches(entry.key(), subject))
            .map(|entry| entry.value().send(msg.clone()).unwrap_or(0))
            .sum()
    }

    /// Stream that stores `subject`.
    ///
    /// JetStream rejects overlapping stream subjects; this transport allows
    /// them and picks a stream binding the exact subject over a wildcard
    /// binding, then the lowest stream name.
    fn stream_for_subject(&self, subject: &str) -> Option<Arc<InMemoryJournal>> {
        self.streams
            .iter()
            .filter_map(|entry| {
                let subjects = &entry.value().spec().subjects;
                let exact = subjects.iter().any(|p| p == subject);
                if exact || subjects.iter().any(|p| subject_matches(p, subject)) {
                    Some((!exact, entry.key().clone(), Arc::clone(entry.value())))
                } else {
                    None
                }
            })
            .min_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
            .map(|(_, _, journal)| journal)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<TransportMessage>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        self.rx
            .recv()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    async fn ack(&self, _sequence: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

struct InMemoryDurableSubscription {
    journal: Arc<InMemoryJournal>,
    state: Arc<Mutex<ConsumerState>>,
    filter: String,
    /// Next sequence to hand out
    cursor: u64,
}

#[async_trait]
impl Subscription for InMemoryDurableSubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        let entry = self.journal.wait_from(self.cursor, &self.filter).await;
        self.cursor = entry.sequence + 1;
        Ok(TransportMessage {
            subject: entry.subject,
            payload: entry.payload,
            headers: entry.headers,
            reply: None,
            timestamp: now_tsc(),
            sequence: Some(entry.sequence),
        })
    }

    async fn ack(&self, sequence: u64) -> Result<(), TransportError> {
        self.state.lock().await.ack(sequence);
        Ok(())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.publish_with_headers(subject, payload, HashMap::new())
            .await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.check_connected()?;
        self.deliver(subject, payload, headers, None);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let tx = self.get_or_create_channel(subject);
        let rx = tx.subscribe();
        Ok(Box::new(InMemorySubscription { rx }))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<TransportMessage, TransportError> {
        self.check_connected()?;
        let inbox = format!("{}{}", INBOX_PREFIX, self.next_sequence());
        let mut rx = self.get_or_create_channel(&inbox).subscribe();

        let delivered = self.deliver(subject, payload, HashMap::new(), Some(inbox.clone()));
        if delivered == 0 {
            self.channels.remove(&inbox);
            return Err(TransportError::RequestFailed(format!(
                "no responders on {}",
                subject
            )));
        }

        let response = tokio::time::timeout(timeout, rx.recv()).await;
        self.channels.remove(&inbox);
        response
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::RequestFailed(e.to_string()))
    }

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), TransportError> {
        self.check_connected()?;
        self.streams
            .entry(spec.name.clone())
            .or_insert_with(|| Arc::new(InMemoryJournal::new(spec.clone())));
        Ok(())
    }

    async fn publish_durable(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<u64, TransportError> {
        self.check_connected()?;
        let journal = self.stream_for_subject(subject).ok_or_else(|| {
            TransportError::StreamFailed(format!("no stream bound to {}", subject))
        })?;
        let sequence = journal
            .append(subject, payload.clone(), headers.clone())
            .await?;
        self.deliver(subject, payload, headers, None);
        Ok(sequence)
    }

    async fn durable_subscribe(
        &self,
        stream: &str,
        consumer: &str,
        filter: &str,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let journal = self
            .journal(stream)
            .ok_or_else(|| TransportError::StreamFailed(format!("stream not found: {}", stream)))?;
        let state = self
            .consumers
            .entry((stream.to_string(), consumer.to_string()))
            .or_default()
            .clone();
        let cursor = state.lock().await.floor + 1;
        Ok(Box::new(InMemoryDurableSubscription {
            journal,
            state,
            filter: filter.to_string(),
            cursor,
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_stream() -> StreamSpec {
        StreamSpec::market_data("FEED", vec!["trade.>".to_string()])
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("trade.btcusdt").await.unwrap();
        transport
            .publish("trade.btcusdt", Bytes::from("hello"))
            .await
            .unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "trade.btcusdt");
        assert_eq!(msg.payload, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("trade.>").await.unwrap();
        transport.publish("trade.btcusdt", Bytes::from("1")).await.unwrap();
        transport.publish("depth.btcusdt", Bytes::from("2")).await.unwrap();
        transport.publish("trade.ethusdt", Bytes::from("3")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().subject, "trade.btcusdt");
        assert_eq!(sub.next().await.unwrap().subject, "trade.ethusdt");
    }

    #[tokio::test]
    async fn test_sequence_numbers_increment() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("test.seq").await.unwrap();
        transport.publish("test.seq", Bytes::from("1")).await.unwrap();
        transport.publish("test.seq", Bytes::from("2")).await.unwrap();
        let msg1 = sub.next().await.unwrap();
        let msg2 = sub.next().await.unwrap();
        assert_eq!(msg1.sequence, Some(0));
        assert_eq!(msg2.sequence, Some(1));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut sub = transport.subscribe("control.feed").await.unwrap();

        let responder = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let msg = sub.next().await.unwrap();
                let reply = msg.reply.unwrap();
                transport.publish(&reply, Bytes::from("pong")).await.unwrap();
            })
        };

        let response = transport
            .request("control.feed", Bytes::from("ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.payload, Bytes::from("pong"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_responder() {
        let transport = InMemoryTransport::new();
        let result = transport
            .request("control.nobody", Bytes::new(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TransportError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let transport = InMemoryTransport::new();
        let _sub = transport.subscribe("control.slow").await.unwrap();
        let result = transport
            .request("control.slow", Bytes::new(), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_publish_durable_requires_stream() {
        let transport = InMemoryTransport::new();
        let result = transport
            .publish_durable("trade.btcusdt", Bytes::from("x"), HashMap::new())
            .await;
        assert!(matches!(result, Err(TransportError::StreamFailed(_))));

        transport.ensure_stream(&trade_stream()).await.unwrap();
        let seq = transport
            .publish_durable("trade.btcusdt", Bytes::from("x"), HashMap::new())
            .await
            .unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn test_disconnected_rejects_publish() {
        let transport = InMemoryTransport::new();
        transport.ensure_stream(&trade_stream()).await.unwrap();
        transport.set_connected(false);
        assert!(!transport.is_connected());
        let result = transport
            .publish_durable("trade.btcusdt", Bytes::from("x"), HashMap::new())
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_durable_redelivers_unacked() {
        let transport = InMemoryTransport::new();
        transport.ensure_stream(&trade_stream()).await.unwrap();
        for payload in ["a", "b", "c"] {
            transport
                .publish_durable("trade.btcusdt", Bytes::from(payload), HashMap::new())
                .await
                .unwrap();
        }

        let mut sub = transport
            .durable_subscribe("FEED", "reader", "trade.>")
            .await
            .unwrap();
        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        sub.ack(first.sequence.unwrap()).await.unwrap();
        assert_eq!(second.payload, Bytes::from("b"));
        sub.unsubscribe().await.unwrap();

        let mut sub = transport
            .durable_subscribe("FEED", "reader", "trade.>")
            .await
            .unwrap();
        let redelivered = sub.next().await.unwrap();
        assert_eq!(redelivered.payload, Bytes::from("b"));
        assert_eq!(redelivered.sequence, Some(2));
    }

    #[tokio::test]
    async fn test_overlapping_streams_prefer_exact_subject() {
        let transport = InMemoryTransport::new();
        for (name, subjects) in [
            ("B", vec!["trade.>".to_string()]),
            ("A", vec!["trade.>".to_string()]),
            ("C", vec!["trade.>".to_string(), "trade.ethusdt".to_string()]),
        ] {
            transport
                .ensure_stream(&StreamSpec::market_data(name, subjects))
                .await
                .unwrap();
        }

        for subject in ["trade.btcusdt", "trade.ethusdt"] {
            transport
                .publish_durable(subject, Bytes::from("x"), HashMap::new())
                .await
                .unwrap();
        }

        assert_eq!(transport.journal("A").unwrap().info().await.messages, 1);
        assert_eq!(transport.journal("B").unwrap().info().await.messages, 0);
        assert_eq!(transport.journal("C").unwrap().info().await.messages, 1);
    }

    #[test]
    fn test_ack_floor_advances_over_gaps() {
        let mut state = ConsumerState::default();
        state.ack(2);
        assert_eq!(state.floor, 0);
        state.ack(1);
        assert_eq!(state.floor, 2);
        state.ack(2);
        assert_eq!(state.floor, 2);
    }
}

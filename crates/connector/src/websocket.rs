//! Websocket session shared by every trade adapter
//!
//! One task per subscription dials the exchange, sends the protocol's
//! subscribe frames and reads until cancelled. Any interruption moves the
//! session to BACKING_OFF and it reconnects with exponential backoff,
//! keeping the caller's callback.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sqx_middleware::Backoff;
use sqx_schema::{Exchange, Instrument, Symbol, Trade};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::ConnectorError;
use crate::handle::{CallbackGate, SessionState, SubscriptionHandle};
use crate::metrics::FeedMetrics;
use crate::normalize::DropReason;
use crate::registry::AdapterContext;
use crate::traits::{TradeAdapter, TradeCallback};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(5);
/// Peers ping every 20s and promise one at least every 60s
pub const READ_DEADLINE: Duration = Duration::from_secs(65);

/// Session timeouts and reconnect schedule
#[derive(Debug, Clone)]
pub struct SessionTiming {
    pub dial_timeout: Duration,
    pub pong_timeout: Duration,
    /// Rolling; extended on every received frame
    pub read_deadline: Duration,
    pub backoff: Backoff,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            dial_timeout: DIAL_TIMEOUT,
            pong_timeout: PONG_TIMEOUT,
            read_deadline: READ_DEADLINE,
            backoff: Backoff::default(),
        }
    }
}

/// Exchange-specific half of an adapter: where to connect, what to send,
/// how to read trade frames.
pub trait TradeProtocol: Send + Sync + 'static {
    fn exchange(&self) -> Exchange;

    fn supported_instruments(&self) -> &'static [Instrument];

    /// Endpoint root for `instrument`
    fn base_url(&self, instrument: Instrument, testnet: bool) -> String;

    /// Full URL to dial from a root (configured or default)
    fn stream_url(&self, base: &str, symbol: &Symbol, instrument: Instrument) -> String;

    /// Text frames sent right after the handshake
    fn subscribe_frames(&self, _symbol: &Symbol, _instrument: Instrument) -> Vec<String> {
        Vec::new()
    }

    /// Application-level keepalive: period and frame
    fn keepalive(&self) -> Option<(Duration, String)> {
        None
    }

    /// Trades carried by one text frame. Control frames yield nothing;
    /// unreadable frames yield one `Malformed` entry.
    fn decode(&self, text: &str, instrument: Instrument) -> Vec<Result<Trade, DropReason>>;
}

/// [`TradeAdapter`] driving a [`TradeProtocol`] over websockets
pub struct StreamingAdapter<P> {
    protocol: Arc<P>,
    feed: String,
    testnet: bool,
    endpoint: Option<String>,
    cancel: CancellationToken,
    timing: SessionTiming,
}

impl<P: TradeProtocol> StreamingAdapter<P> {
    pub fn new(protocol: P, ctx: &AdapterContext) -> Result<Self, ConnectorError> {
        if let Some(endpoint) = &ctx.endpoint {
            validate_endpoint(endpoint)?;
        }
        Ok(Self {
            protocol: Arc::new(protocol),
            feed: ctx.feed.clone(),
            testnet: ctx.testnet,
            endpoint: ctx.endpoint.clone(),
            cancel: ctx.cancel.clone(),
            timing: ctx.timing.clone(),
        })
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// URL a subscription for `symbol` dials
    pub fn url_for(&self, symbol: &Symbol, instrument: Instrument) -> String {
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => self.protocol.base_url(instrument, self.testnet),
        };
        self.protocol.stream_url(&base, symbol, instrument)
    }
}

impl<P: TradeProtocol> TradeAdapter for StreamingAdapter<P> {
    fn exchange(&self) -> Exchange {
        self.protocol.exchange()
    }

    fn supported_instruments(&self) -> &'static [Instrument] {
        self.protocol.supported_instruments()
    }

    fn subscribe(
        &self,
        symbol: &Symbol,
        instrument: Instrument,
        callback: TradeCallback,
    ) -> Result<SubscriptionHandle, ConnectorError> {
        if !self.supports(instrument) {
            return Err(ConnectorError::UnsupportedInstrument {
                exchange: self.exchange(),
                instrument,
            });
        }

        let cancel = self.cancel.child_token();
        let gate = Arc::new(CallbackGate::new());
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let session = Session {
            protocol: Arc::clone(&self.protocol),
            metrics: FeedMetrics::new(self.feed.clone()),
            url: self.url_for(symbol, instrument),
            symbol: symbol.clone(),
            instrument,
            callback,
            gate: Arc::clone(&gate),
            cancel: cancel.clone(),
            state: state_tx,
            timing: self.timing.clone(),
        };

        info!(
            feed = %self.feed,
            exchange = %self.exchange(),
            symbol = %symbol,
            instrument = %instrument,
            "Starting trade subscription"
        );
        let task = tokio::spawn(session.run());
        Ok(SubscriptionHandle::new(cancel, gate, state_rx, task))
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConnectorError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConnectorError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConnectorError::InvalidEndpoint(format!(
            "{}: unsupported scheme {:?}",
            endpoint, other
        ))),
    }
}

struct Session<P> {
    protocol: Arc<P>,
    metrics: FeedMetrics,
    url: String,
    symbol: Symbol,
    instrument: Instrument,
    callback: TradeCallback,
    gate: Arc<CallbackGate>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    timing: SessionTiming,
}

impl<P: TradeProtocol> Session<P> {
    async fn run(self) {
        let mut backoff = self.timing.backoff.clone();

        while !self.cancel.is_cancelled() {
            self.set_state(SessionState::Connecting);
            let result = self.connect_and_read(&mut backoff).await;
            self.metrics.set_connected(false);

            let err = match result {
                Ok(()) => break,
                Err(e) => e,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(SessionState::BackingOff);
            self.metrics.inc_reconnects();
            let delay = backoff.next_delay();
            warn!(
                feed = %self.metrics.feed(),
                url = %self.url,
                error = %err,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Websocket session interrupted, backing off"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.gate.close();
        self.set_state(SessionState::Closed);
        info!(feed = %self.metrics.feed(), symbol = %self.symbol, "Trade subscription closed");
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Ok(()) only on cancellation
    async fn connect_and_read(&self, backoff: &mut Backoff) -> Result<(), ConnectorError> {
        debug!(url = %self.url, "Dialing exchange");
        let mut ws = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            dialed = timeout(self.timing.dial_timeout, connect_async(self.url.as_str())) => {
                let (ws, response) = dialed.map_err(|_| {
                    ConnectorError::Transient(format!(
                        "dial timed out after {}s",
                        self.timing.dial_timeout.as_secs()
                    ))
                })??;
                debug!(status = ?response.status(), "Websocket handshake complete");
                ws
            }
        };

        for frame in self.protocol.subscribe_frames(&self.symbol, self.instrument) {
            debug!(frame = %frame, "Sending subscribe frame");
            ws.send(Message::Text(frame)).await?;
        }

        self.set_state(SessionState::Subscribed);
        self.metrics.set_connected(true);
        backoff.reset();
        info!(feed = %self.metrics.feed(), url = %self.url, "Websocket subscribed");

        let result = self.read_loop(&mut ws).await;
        if result.is_ok() {
            let _ = timeout(self.timing.pong_timeout, ws.close(None)).await;
        }
        result
    }

    async fn read_loop(&self, ws: &mut WsStream) -> Result<(), ConnectorError> {
        let deadline = sleep(self.timing.read_deadline);
        tokio::pin!(deadline);
        let mut keepalive = self
            .protocol
            .keepalive()
            .map(|(period, frame)| (interval_at(Instant::now() + period, period), frame));

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                _ = &mut deadline => {
                    return Err(ConnectorError::Transient(format!(
                        "no frame within {}s",
                        self.timing.read_deadline.as_secs()
                    )));
                }

                frame = next_keepalive(&mut keepalive) => {
                    trace!("Sending keepalive");
                    ws.send(Message::Text(frame)).await?;
                }

                msg = ws.next() => {
                    deadline.as_mut().reset(Instant::now() + self.timing.read_deadline);
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.dispatch(&text) {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            trace!("Received ping, sending pong");
                            timeout(self.timing.pong_timeout, ws.send(Message::Pong(payload)))
                                .await
                                .map_err(|_| ConnectorError::Transient("pong write timed out".into()))??;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(ConnectorError::Transient(format!(
                                "closed by peer: {:?}",
                                frame
                            )));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ConnectorError::Transient("stream ended".into())),
                    }
                }
            }
        }
    }

    /// Hand decoded trades to the callback in frame order. False once cancelled.
    fn dispatch(&self, text: &str) -> bool {
        for decoded in self.protocol.decode(text, self.instrument) {
            match decoded {
                Ok(trade) => {
                    self.metrics.inc_received();
                    let callback = self.callback.as_ref();
                    if !self.gate.invoke(|| callback(trade)) {
                        return false;
                    }
                }
                Err(reason) => {
                    self.metrics.inc_dropped(reason);
                    warn!(
                        feed = %self.metrics.feed(),
                        reason = reason.label(),
                        raw = %text,
                        "Dropping exchange frame"
                    );
                }
            }
        }
        true
    }
}

async fn next_keepalive(keepalive: &mut Option<(Interval, String)>) -> String {
    match keepalive {
        Some((interval, frame)) => {
            interval.tick().await;
            frame.clone()
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("ws://127.0.0.1:9000").is_ok());
        assert!(validate_endpoint("wss://stream.binance.com:9443").is_ok());
        assert!(matches!(
            validate_endpoint("http://example.com"),
            Err(ConnectorError::InvalidEndpoint(_))
        ));
        assert!(validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_default_timing() {
        let timing = SessionTiming::default();
        assert_eq!(timing.dial_timeout, Duration::from_secs(10));
        assert_eq!(timing.pong_timeout, Duration::from_secs(5));
        assert_eq!(timing.read_deadline, Duration::from_secs(65));
    }
}

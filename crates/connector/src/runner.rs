//! Joins one adapter subscription to the in-process bus and the broker

use std::sync::Arc;
use std::time::Duration;

use sqx_middleware::{EventBus, PubManager, PublishError, SubjectBuilder};
use sqx_schema::{Instrument, Symbol, Trade};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::handle::{SessionState, SubscriptionHandle};
use crate::metrics::FeedMetrics;
use crate::traits::{TradeAdapter, TradeCallback};

pub const DEFAULT_FORWARD_QUEUE: usize = 1024;

/// Where a feed's trades go
#[derive(Clone)]
pub struct FeedSinks {
    pub bus: EventBus<Trade>,
    pub publishers: Arc<PubManager>,
    /// Trades waiting for the broker; full means drop
    pub forward_capacity: usize,
}

/// A running feed: the subscription plus its broker forward task
pub struct FeedRunner {
    name: String,
    symbol: Symbol,
    instrument: Instrument,
    handle: SubscriptionHandle,
    forward: JoinHandle<()>,
    metrics: FeedMetrics,
}

impl FeedRunner {
    /// The callback publishes on `trade.<symbol-lower>` and queues for the
    /// broker without ever blocking the session's read task.
    pub fn start(
        name: impl Into<String>,
        adapter: &dyn TradeAdapter,
        symbol: &Symbol,
        instrument: Instrument,
        sinks: FeedSinks,
    ) -> Result<Self, ConnectorError> {
        let name = name.into();
        let metrics = FeedMetrics::new(name.clone());
        let topic = SubjectBuilder::new().trade(symbol);
        let (tx, rx) = mpsc::channel(sinks.forward_capacity.max(1));

        let callback: TradeCallback = {
            let metrics = metrics.clone();
            let bus = sinks.bus.clone();
            Arc::new(move |trade: Trade| {
                if let Err(e) = bus.publish(&topic, trade.clone()) {
                    metrics.inc_bus_failures();
                    debug!(feed = %metrics.feed(), error = %e, "Bus rejected trade");
                }
                if tx.try_send(trade).is_err() {
                    metrics.inc_forward_dropped();
                }
            })
        };

        let handle = adapter.subscribe(symbol, instrument, callback)?;
        let forward = tokio::spawn(forward(metrics.clone(), rx, sinks.publishers));

        info!(feed = %name, symbol = %symbol, instrument = %instrument, "Feed started");
        Ok(Self {
            name,
            symbol: symbol.clone(),
            instrument,
            handle,
            forward,
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn metrics(&self) -> &FeedMetrics {
        &self.metrics
    }

    /// Cancel the subscription and let queued trades reach the broker.
    /// Returns false if `grace` ran out and the forward task was aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.handle.cancel();
        let mut forward = self.forward;
        let handle = self.handle;
        let drained = timeout(grace, async {
            handle.join().await;
            let _ = (&mut forward).await;
        })
        .await
        .is_ok();

        if !drained {
            warn!(feed = %self.name, "Forward queue not drained within grace, aborting");
            forward.abort();
        }
        info!(feed = %self.name, drained, "Feed stopped");
        drained
    }
}

async fn forward(metrics: FeedMetrics, mut rx: mpsc::Receiver<Trade>, publishers: Arc<PubManager>) {
    while let Some(trade) = rx.recv().await {
        match publishers.publish_trade(&trade).await {
            Ok(()) => metrics.inc_broker_publish(true),
            Err(PublishError::PublisherUnavailable { endpoint }) => {
                metrics.inc_broker_publish(false);
                debug!(feed = %metrics.feed(), endpoint = %endpoint, "Publisher unavailable, trade not forwarded");
            }
            Err(e) => {
                metrics.inc_broker_publish(false);
                warn!(feed = %metrics.feed(), error = %e, id = %trade.id_str(), "Broker publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::CallbackGate;
    use sqx_metadata::ConnectionConfig;
    use sqx_middleware::{Backoff, DurablePublisher, InMemoryTransport, Journal, Transport};
    use sqx_schema::{Exchange, Side};
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    /// Emits a fixed list of trades once, then idles until cancelled
    struct ScriptedAdapter {
        trades: Vec<Trade>,
    }

    impl TradeAdapter for ScriptedAdapter {
        fn exchange(&self) -> Exchange {
            Exchange::Binance
        }

        fn supported_instruments(&self) -> &'static [Instrument] {
            &[Instrument::Spot]
        }

        fn subscribe(
            &self,
            _symbol: &Symbol,
            _instrument: Instrument,
            callback: TradeCallback,
        ) -> Result<SubscriptionHandle, ConnectorError> {
            let cancel = CancellationToken::new();
            let gate = Arc::new(CallbackGate::new());
            let (state_tx, state_rx) = watch::channel(SessionState::Subscribed);
            let trades = self.trades.clone();
            let task = tokio::spawn({
                let cancel = cancel.clone();
                let gate = Arc::clone(&gate);
                async move {
                    for trade in trades {
                        gate.invoke(|| callback(trade));
                    }
                    cancel.cancelled().await;
                    state_tx.send_replace(SessionState::Closed);
                }
            });
            Ok(SubscriptionHandle::new(cancel, gate, state_rx, task))
        }
    }

    fn trade(id: i64) -> Trade {
        Trade {
            id,
            symbol: Symbol::new("BTC", "USDT").unwrap(),
            exchange: Exchange::Binance,
            instrument: Instrument::Spot,
            side: Side::Buy,
            price: 30000.5,
            quantity: 0.01,
            timestamp: 1_700_000_000_000,
        }
    }

    async fn publishers(transport: Arc<InMemoryTransport>) -> Arc<PubManager> {
        let config = ConnectionConfig::parse("nats://localhost:4222?stream=runner").unwrap();
        let publisher = DurablePublisher::start(
            transport as Arc<dyn Transport>,
            &config,
            Backoff::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        Arc::new(PubManager::new(vec![publisher]))
    }

    #[tokio::test]
    async fn test_trades_reach_bus_and_broker() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = EventBus::new(16);
        let (mut rx, _unsubscribe) = bus.subscribe("trade.btcusdt").unwrap();
        let sinks = FeedSinks {
            bus: bus.clone(),
            publishers: publishers(Arc::clone(&transport)).await,
            forward_capacity: 16,
        };
        let adapter = ScriptedAdapter {
            trades: vec![trade(1), trade(2)],
        };
        let symbol = Symbol::new("BTC", "USDT").unwrap();

        let runner =
            FeedRunner::start("runner-test-flow", &adapter, &symbol, Instrument::Spot, sinks).unwrap();

        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(rx.recv().await.unwrap().id, 2);
        assert!(runner.shutdown(Duration::from_secs(1)).await);

        let journal = transport.journal("runner").unwrap();
        let info = journal.info().await;
        assert_eq!(info.messages, 2);
        let first = journal.read_from(1, "trade.btcusdt").await.unwrap().unwrap();
        assert_eq!(first.subject, "trade.btcusdt");
        assert_eq!(first.headers["Nats-Msg-Id"], "BINANCE-SPOT-BTC-USDT-1");
    }

    #[tokio::test]
    async fn test_full_bus_counted_not_blocking() {
        let transport = Arc::new(InMemoryTransport::new());
        // rendezvous subscriber that never reads
        let bus = EventBus::new(0);
        let (_rx, _unsubscribe) = bus.subscribe("trade.btcusdt").unwrap();
        let sinks = FeedSinks {
            bus,
            publishers: publishers(transport).await,
            forward_capacity: 16,
        };
        let adapter = ScriptedAdapter {
            trades: (1..=3).map(trade).collect(),
        };
        let symbol = Symbol::new("BTC", "USDT").unwrap();

        let runner =
            FeedRunner::start("runner-test-full", &adapter, &symbol, Instrument::Spot, sinks).unwrap();
        let metrics = runner.metrics().clone();
        assert!(runner.shutdown(Duration::from_secs(1)).await);
        assert_eq!(metrics.bus_failures(), 3);
    }
}

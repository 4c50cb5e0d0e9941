//! Directory of adapter factories keyed by (exchange, data kind)
//!
//! Populated once through [`AdapterRegistryBuilder`] at program start and
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use sqx_metadata::FeedConfig;
use sqx_schema::{DataType, Exchange};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConnectorError, ResolverError};
use crate::traits::{KeyResolver, TradeAdapter};
use crate::websocket::SessionTiming;
use crate::{binance, bybit};

pub type AdapterFactory =
    Arc<dyn Fn(&AdapterContext) -> Result<Arc<dyn TradeAdapter>, ConnectorError> + Send + Sync>;

/// Everything injected into an adapter at construction
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Feed name, used for logs and metric labels
    pub feed: String,
    pub testnet: bool,
    /// Replaces the exchange's endpoint constant
    pub endpoint: Option<String>,
    pub credentials: HashMap<String, String>,
    /// Parent of every subscription the adapter starts
    pub cancel: CancellationToken,
    pub timing: SessionTiming,
}

impl AdapterContext {
    pub fn new(feed: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            feed: feed.into(),
            testnet: false,
            endpoint: None,
            credentials: HashMap::new(),
            cancel,
            timing: SessionTiming::default(),
        }
    }

    /// Context for a configured feed, resolving its `keys` source
    pub fn from_feed(
        feed: &FeedConfig,
        resolver: &dyn KeyResolver,
        cancel: CancellationToken,
    ) -> Result<Self, ResolverError> {
        let credentials = match &feed.keys {
            Some(source) => resolver.resolve(source)?,
            None => HashMap::new(),
        };
        Ok(Self::new(feed.name(), cancel)
            .with_testnet(feed.testnet)
            .with_endpoint(feed.endpoint.clone())
            .with_credentials(credentials))
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    factories: HashMap<(Exchange, DataType), AdapterFactory>,
}

impl AdapterRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration for a key wins; later ones are ignored.
    pub fn register<F>(mut self, exchange: Exchange, kind: DataType, factory: F) -> Self
    where
        F: Fn(&AdapterContext) -> Result<Arc<dyn TradeAdapter>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        if self.factories.contains_key(&(exchange, kind)) {
            debug!(exchange = %exchange, kind = %kind, "Adapter already registered, ignoring");
            return self;
        }
        self.factories.insert((exchange, kind), Arc::new(factory));
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            factories: self.factories,
        }
    }
}

pub struct AdapterRegistry {
    factories: HashMap<(Exchange, DataType), AdapterFactory>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::new()
    }

    /// Binance spot, Binance USD-M perp and Bybit trade adapters
    pub fn with_defaults() -> Self {
        Self::builder()
            .register(Exchange::Binance, DataType::Trade, binance::spot_adapter)
            .register(Exchange::BinancePerp, DataType::Trade, binance::perp_adapter)
            .register(Exchange::Bybit, DataType::Trade, bybit::adapter)
            .build()
    }

    pub fn lookup(&self, exchange: Exchange, kind: DataType) -> Result<&AdapterFactory, ConnectorError> {
        self.factories
            .get(&(exchange, kind))
            .ok_or(ConnectorError::AdapterNotFound { exchange, kind })
    }

    pub fn create(
        &self,
        exchange: Exchange,
        kind: DataType,
        ctx: &AdapterContext,
    ) -> Result<Arc<dyn TradeAdapter>, ConnectorError> {
        let factory = self.lookup(exchange, kind)?;
        factory(ctx)
    }

    pub fn contains(&self, exchange: Exchange, kind: DataType) -> bool {
        self.factories.contains_key(&(exchange, kind))
    }

    /// Registered keys in wire order
    pub fn keys(&self) -> Vec<(Exchange, DataType)> {
        let mut keys: Vec<_> = self.factories.keys().copied().collect();
        keys.sort_by_key(|(exchange, kind)| (*exchange as i32, *kind as i32));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::BinanceProtocol;
    use crate::bybit::BybitProtocol;
    use crate::websocket::StreamingAdapter;
    use sqx_schema::Instrument;

    fn ctx() -> AdapterContext {
        AdapterContext::new("registry-test", CancellationToken::new())
    }

    #[test]
    fn test_defaults() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(
            registry.keys(),
            vec![
                (Exchange::Binance, DataType::Trade),
                (Exchange::BinancePerp, DataType::Trade),
                (Exchange::Bybit, DataType::Trade),
            ]
        );

        let adapter = registry
            .create(Exchange::Bybit, DataType::Trade, &ctx())
            .unwrap();
        assert_eq!(adapter.exchange(), Exchange::Bybit);
        assert!(adapter.supports(Instrument::Inverse));
    }

    #[test]
    fn test_context_from_feed() {
        let env = sqx_metadata::Environment::from_yaml(
            r#"
nats:
  url: nats://localhost:4222
feeds:
  - exchange: BYBIT
    instrument: PERP
    symbol: ETH-USDT
    testnet: true
    endpoint: ws://127.0.0.1:9001
"#,
        )
        .unwrap();
        let ctx = AdapterContext::from_feed(
            &env.feeds[0],
            &crate::resolver::EnvResolver::new(),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(ctx.feed, "bybit-perp-eth-usdt");
        assert!(ctx.testnet);
        assert_eq!(ctx.endpoint.as_deref(), Some("ws://127.0.0.1:9001"));
        assert!(ctx.credentials.is_empty());
    }

    #[test]
    fn test_not_found() {
        let registry = AdapterRegistry::with_defaults();
        assert!(matches!(
            registry.create(Exchange::Binance, DataType::Depth, &ctx()),
            Err(ConnectorError::AdapterNotFound {
                exchange: Exchange::Binance,
                kind: DataType::Depth
            })
        ));
        assert!(!registry.contains(Exchange::Unknown, DataType::Trade));
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = AdapterRegistry::builder()
            .register(Exchange::Binance, DataType::Trade, |ctx: &AdapterContext| {
                Ok(Arc::new(StreamingAdapter::new(BybitProtocol::new(), ctx)?) as Arc<dyn TradeAdapter>)
            })
            .register(Exchange::Binance, DataType::Trade, |ctx: &AdapterContext| {
                Ok(Arc::new(StreamingAdapter::new(BinanceProtocol::spot(), ctx)?) as Arc<dyn TradeAdapter>)
            })
            .build();

        let adapter = registry
            .create(Exchange::Binance, DataType::Trade, &ctx())
            .unwrap();
        assert_eq!(adapter.exchange(), Exchange::Bybit);
        assert_eq!(registry.keys().len(), 1);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let registry = AdapterRegistry::with_defaults();
        let ctx = ctx().with_endpoint(Some("http://localhost:1".to_string()));
        assert!(matches!(
            registry.create(Exchange::Binance, DataType::Trade, &ctx),
            Err(ConnectorError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_instrument() {
        let registry = AdapterRegistry::with_defaults();
        let adapter = registry
            .create(Exchange::Binance, DataType::Trade, &ctx())
            .unwrap();
        let symbol = sqx_schema::Symbol::new("BTC", "USDT").unwrap();
        let result = adapter.subscribe(&symbol, Instrument::Perp, Arc::new(|_: sqx_schema::Trade| {}));
        assert!(matches!(
            result,
            Err(ConnectorError::UnsupportedInstrument {
                exchange: Exchange::Binance,
                instrument: Instrument::Perp
            })
        ));
    }
}

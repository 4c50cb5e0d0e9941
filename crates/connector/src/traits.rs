use std::collections::HashMap;
use std::sync::Arc;

use sqx_schema::{Exchange, Instrument, Symbol, Trade};

use crate::error::{ConnectorError, ResolverError};
use crate::handle::SubscriptionHandle;

/// Receives every normalized trade of one subscription, in exchange order,
/// from the subscription's own task.
pub type TradeCallback = Arc<dyn Fn(Trade) + Send + Sync>;

/// Streaming trade client for one exchange
pub trait TradeAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    fn supported_instruments(&self) -> &'static [Instrument];

    fn supports(&self, instrument: Instrument) -> bool {
        self.supported_instruments().contains(&instrument)
    }

    /// Validate the request and start a background session. Returns as soon
    /// as the session is spawned; connection failures are retried inside it.
    /// Must be called inside a tokio runtime.
    fn subscribe(
        &self,
        symbol: &Symbol,
        instrument: Instrument,
        callback: TradeCallback,
    ) -> Result<SubscriptionHandle, ConnectorError>;
}

/// Resolves credentials from a source string like "env:API_KEY,API_SECRET"
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError>;
}

//! Binance spot and USD-M perpetual trade streams
//!
//! Public `<symbol>@trade` streams need no subscribe frame; the server pings
//! every 20 seconds and the session answers with a matching pong.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use sqx_schema::{Exchange, Instrument, Side, Symbol, Trade};
use tracing::debug;

use crate::error::ConnectorError;
use crate::normalize::{normalize, DropReason, RawTrade};
use crate::registry::AdapterContext;
use crate::traits::TradeAdapter;
use crate::websocket::{StreamingAdapter, TradeProtocol};

pub const BINANCE_SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
pub const BINANCE_SPOT_TESTNET_WS_URL: &str = "wss://testnet.binance.vision";
pub const BINANCE_PERP_WS_URL: &str = "wss://fstream.binance.com";
pub const BINANCE_PERP_TESTNET_WS_URL: &str = "wss://fstream.binancefuture.com";

const SPOT_INSTRUMENTS: &[Instrument] = &[Instrument::Spot];
const PERP_INSTRUMENTS: &[Instrument] = &[Instrument::Perp];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    Spot,
    UsdMPerp,
}

/// `{"e":"trade","E":..,"s":"BTCUSDT","t":42,"p":"30000.5","q":"0.01","T":..,"m":false}`
#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    id: i64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Clone)]
pub struct BinanceProtocol {
    market: BinanceMarket,
}

impl BinanceProtocol {
    pub fn spot() -> Self {
        Self {
            market: BinanceMarket::Spot,
        }
    }

    pub fn perp() -> Self {
        Self {
            market: BinanceMarket::UsdMPerp,
        }
    }

    pub fn market(&self) -> BinanceMarket {
        self.market
    }

    fn decode_event(&self, event: Value, instrument: Instrument) -> Result<Trade, DropReason> {
        let event: TradeEvent = serde_json::from_value(event).map_err(|_| DropReason::Malformed)?;
        let raw = RawTrade {
            id: event.id,
            symbol: &event.symbol,
            side: Side::from_buyer_maker(event.buyer_is_maker),
            price: &event.price,
            quantity: &event.quantity,
            timestamp: event.trade_time,
        };
        normalize(&raw, self.exchange(), instrument)
    }
}

impl TradeProtocol for BinanceProtocol {
    fn exchange(&self) -> Exchange {
        match self.market {
            BinanceMarket::Spot => Exchange::Binance,
            BinanceMarket::UsdMPerp => Exchange::BinancePerp,
        }
    }

    fn supported_instruments(&self) -> &'static [Instrument] {
        match self.market {
            BinanceMarket::Spot => SPOT_INSTRUMENTS,
            BinanceMarket::UsdMPerp => PERP_INSTRUMENTS,
        }
    }

    fn base_url(&self, _instrument: Instrument, testnet: bool) -> String {
        let url = match (self.market, testnet) {
            (BinanceMarket::Spot, false) => BINANCE_SPOT_WS_URL,
            (BinanceMarket::Spot, true) => BINANCE_SPOT_TESTNET_WS_URL,
            (BinanceMarket::UsdMPerp, false) => BINANCE_PERP_WS_URL,
            (BinanceMarket::UsdMPerp, true) => BINANCE_PERP_TESTNET_WS_URL,
        };
        url.to_string()
    }

    fn stream_url(&self, base: &str, symbol: &Symbol, _instrument: Instrument) -> String {
        format!("{}/ws/{}@trade", base, symbol.lower())
    }

    fn decode(&self, text: &str, instrument: Instrument) -> Vec<Result<Trade, DropReason>> {
        let mut frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return vec![Err(DropReason::Malformed)],
        };
        // combined-stream envelope
        if let Some(data) = frame.get_mut("data") {
            frame = data.take();
        }
        match frame.get("e").and_then(Value::as_str) {
            Some("trade") => vec![self.decode_event(frame, instrument)],
            Some(other) => {
                debug!(event = %other, "Ignoring Binance event");
                Vec::new()
            }
            // subscription results and other replies
            None if frame.get("id").is_some() => Vec::new(),
            None => vec![Err(DropReason::Malformed)],
        }
    }
}

pub fn spot_adapter(ctx: &AdapterContext) -> Result<Arc<dyn TradeAdapter>, ConnectorError> {
    Ok(Arc::new(StreamingAdapter::new(BinanceProtocol::spot(), ctx)?))
}

pub fn perp_adapter(ctx: &AdapterContext) -> Result<Arc<dyn TradeAdapter>, ConnectorError> {
    Ok(Arc::new(StreamingAdapter::new(BinanceProtocol::perp(), ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":42,"p":"30000.5","q":"0.01","T":1700000000000,"m":false,"M":true}"#;

    #[test]
    fn test_decode_trade() {
        let decoded = BinanceProtocol::spot().decode(FRAME, Instrument::Spot);
        assert_eq!(decoded.len(), 1);
        let trade = decoded[0].as_ref().unwrap();
        assert_eq!(trade.id, 42);
        assert_eq!(trade.symbol, Symbol::new("BTC", "USDT").unwrap());
        assert_eq!(trade.exchange, Exchange::Binance);
        assert_eq!(trade.instrument, Instrument::Spot);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.price, 30000.5);
        assert_eq!(trade.quantity, 0.01);
        assert_eq!(trade.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_buyer_maker_is_sell() {
        let frame = FRAME.replace(r#""m":false"#, r#""m":true"#);
        let decoded = BinanceProtocol::perp().decode(&frame, Instrument::Perp);
        let trade = decoded[0].as_ref().unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.exchange, Exchange::BinancePerp);
    }

    #[test]
    fn test_combined_envelope() {
        let frame = format!(r#"{{"stream":"btcusdt@trade","data":{}}}"#, FRAME);
        let decoded = BinanceProtocol::spot().decode(&frame, Instrument::Spot);
        assert!(decoded[0].is_ok());
    }

    #[test]
    fn test_drops_and_ignores() {
        let protocol = BinanceProtocol::spot();
        assert_eq!(
            protocol.decode(&FRAME.replace("30000.5", "0"), Instrument::Spot),
            vec![Err(DropReason::PriceRange)]
        );
        assert_eq!(
            protocol.decode(&FRAME.replace("BTCUSDT", "XYZUSD"), Instrument::Spot),
            vec![Err(DropReason::UnknownSymbol)]
        );
        assert_eq!(
            protocol.decode(r#"{"e":"trade","s":"BTCUSDT"}"#, Instrument::Spot),
            vec![Err(DropReason::Malformed)]
        );
        assert_eq!(protocol.decode("not json", Instrument::Spot), vec![Err(DropReason::Malformed)]);
        assert!(protocol.decode(r#"{"result":null,"id":1}"#, Instrument::Spot).is_empty());
        assert!(protocol.decode(r#"{"e":"kline"}"#, Instrument::Spot).is_empty());
    }

    #[test]
    fn test_urls() {
        let symbol = Symbol::new("BTC", "USDT").unwrap();
        let spot = BinanceProtocol::spot();
        assert_eq!(
            spot.stream_url(&spot.base_url(Instrument::Spot, false), &symbol, Instrument::Spot),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );
        assert_eq!(spot.base_url(Instrument::Spot, true), BINANCE_SPOT_TESTNET_WS_URL);

        let perp = BinanceProtocol::perp();
        assert_eq!(perp.base_url(Instrument::Perp, false), BINANCE_PERP_WS_URL);
        assert_eq!(perp.base_url(Instrument::Perp, true), BINANCE_PERP_TESTNET_WS_URL);
    }

    #[test]
    fn test_instrument_gating() {
        assert_eq!(BinanceProtocol::spot().supported_instruments(), &[Instrument::Spot]);
        assert_eq!(BinanceProtocol::perp().supported_instruments(), &[Instrument::Perp]);
    }
}

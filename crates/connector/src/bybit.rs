//! Bybit v5 public trade streams (spot, linear and inverse)

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqx_schema::{Exchange, Instrument, Side, Symbol, Trade};
use tracing::debug;

use crate::error::ConnectorError;
use crate::normalize::{normalize, DropReason, RawTrade};
use crate::registry::AdapterContext;
use crate::traits::TradeAdapter;
use crate::websocket::{StreamingAdapter, TradeProtocol};

pub const BYBIT_WS_URL: &str = "wss://stream.bybit.com";
pub const BYBIT_TESTNET_WS_URL: &str = "wss://stream-testnet.bybit.com";

/// Bybit drops connections without an app ping within 20s
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

const TOPIC_PREFIX: &str = "publicTrade.";
const INSTRUMENTS: &[Instrument] = &[Instrument::Spot, Instrument::Perp, Instrument::Inverse];

#[derive(Debug, Deserialize)]
struct TopicFrame {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<Vec<TradeEntry>>,
}

/// `{"T":..,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","i":"..","seq":..}`
#[derive(Debug, Deserialize)]
struct TradeEntry {
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "v")]
    quantity: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "i")]
    trade_id: String,
}

impl TradeEntry {
    /// Numeric trade id as sent, otherwise a stable 63-bit FNV-1a hash of it.
    fn id(&self) -> Option<i64> {
        if self.trade_id.is_empty() {
            return None;
        }
        match self.trade_id.parse() {
            Ok(id) => Some(id),
            Err(_) => Some(hash_trade_id(&self.trade_id)),
        }
    }
}

fn hash_trade_id(raw: &str) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = raw
        .bytes()
        .fold(OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME));
    (hash & i64::MAX as u64) as i64
}

#[derive(Debug, Clone, Default)]
pub struct BybitProtocol;

impl BybitProtocol {
    pub fn new() -> Self {
        Self
    }

    fn category(instrument: Instrument) -> &'static str {
        match instrument {
            Instrument::Perp => "linear",
            Instrument::Inverse => "inverse",
            _ => "spot",
        }
    }

    fn decode_entry(&self, entry: &TradeEntry, instrument: Instrument) -> Result<Trade, DropReason> {
        let id = entry.id().ok_or(DropReason::Malformed)?;
        let raw = RawTrade {
            id,
            symbol: &entry.symbol,
            side: entry.side.parse().unwrap_or(Side::Unknown),
            price: &entry.price,
            quantity: &entry.quantity,
            timestamp: entry.trade_time,
        };
        normalize(&raw, Exchange::Bybit, instrument)
    }
}

impl TradeProtocol for BybitProtocol {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn supported_instruments(&self) -> &'static [Instrument] {
        INSTRUMENTS
    }

    fn base_url(&self, instrument: Instrument, testnet: bool) -> String {
        let host = if testnet { BYBIT_TESTNET_WS_URL } else { BYBIT_WS_URL };
        format!("{}/v5/public/{}", host, Self::category(instrument))
    }

    fn stream_url(&self, base: &str, _symbol: &Symbol, _instrument: Instrument) -> String {
        base.to_string()
    }

    fn subscribe_frames(&self, symbol: &Symbol, _instrument: Instrument) -> Vec<String> {
        let frame = serde_json::json!({
            "op": "subscribe",
            "args": [format!("{}{}", TOPIC_PREFIX, symbol.concatenated())],
        });
        vec![frame.to_string()]
    }

    fn keepalive(&self) -> Option<(Duration, String)> {
        Some((PING_INTERVAL, r#"{"op":"ping"}"#.to_string()))
    }

    fn decode(&self, text: &str, instrument: Instrument) -> Vec<Result<Trade, DropReason>> {
        let frame: TopicFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return vec![Err(DropReason::Malformed)],
        };
        match frame.topic.as_deref() {
            Some(topic) if topic.starts_with(TOPIC_PREFIX) => match frame.data {
                Some(entries) => entries
                    .iter()
                    .map(|entry| self.decode_entry(entry, instrument))
                    .collect(),
                None => vec![Err(DropReason::Malformed)],
            },
            Some(topic) => {
                debug!(topic = %topic, "Ignoring Bybit topic");
                Vec::new()
            }
            // op acks and pongs
            None => Vec::new(),
        }
    }
}

pub fn adapter(ctx: &AdapterContext) -> Result<Arc<dyn TradeAdapter>, ConnectorError> {
    Ok(Arc::new(StreamingAdapter::new(BybitProtocol::new(), ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1700000000100,"data":[
        {"T":1700000000000,"s":"BTCUSDT","S":"Buy","v":"0.01","p":"30000.5","L":"PlusTick","i":"42","BT":false,"seq":900},
        {"T":1700000000050,"s":"BTCUSDT","S":"Sell","v":"0.02","p":"30000.0","L":"MinusTick","i":"20f43950-d8dd-5b31-9112-a178eb6023af","BT":false,"seq":901}
    ]}"#;

    #[test]
    fn test_decode_batch_in_order() {
        let decoded = BybitProtocol::new().decode(FRAME, Instrument::Perp);
        assert_eq!(decoded.len(), 2);

        let first = decoded[0].as_ref().unwrap();
        assert_eq!(first.id, 42);
        assert_eq!(first.side, Side::Buy);
        assert_eq!(first.exchange, Exchange::Bybit);
        assert_eq!(first.instrument, Instrument::Perp);

        let second = decoded[1].as_ref().unwrap();
        assert_eq!(second.id, hash_trade_id("20f43950-d8dd-5b31-9112-a178eb6023af"));
        assert!(second.id >= 0);
        assert_eq!(second.side, Side::Sell);
        assert_eq!(second.quantity, 0.02);
    }

    #[test]
    fn test_uuid_ids_sharing_seq_stay_distinct() {
        let frame = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1700000000100,"data":[
            {"T":1700000000000,"s":"BTCUSDT","S":"Buy","v":"0.01","p":"30000.5","i":"0b4f0e6c-1a52-5d37-8c4a-6a3f3f1d2e01","seq":77},
            {"T":1700000000000,"s":"BTCUSDT","S":"Buy","v":"0.01","p":"30000.5","i":"0b4f0e6c-1a52-5d37-8c4a-6a3f3f1d2e02","seq":77}
        ]}"#;
        let decoded = BybitProtocol::new().decode(frame, Instrument::Spot);
        let first = decoded[0].as_ref().unwrap();
        let second = decoded[1].as_ref().unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.id_str(), second.id_str());
    }

    #[test]
    fn test_bad_side_dropped() {
        let frame = FRAME.replace(r#""S":"Buy""#, r#""S":"None""#);
        let decoded = BybitProtocol::new().decode(&frame, Instrument::Spot);
        assert_eq!(decoded[0], Err(DropReason::UnknownEnum));
        assert!(decoded[1].is_ok());
    }

    #[test]
    fn test_control_frames_ignored() {
        let protocol = BybitProtocol::new();
        assert!(protocol
            .decode(r#"{"success":true,"ret_msg":"pong","op":"ping"}"#, Instrument::Spot)
            .is_empty());
        assert!(protocol
            .decode(r#"{"success":true,"ret_msg":"","op":"subscribe"}"#, Instrument::Spot)
            .is_empty());
        assert_eq!(protocol.decode("{", Instrument::Spot), vec![Err(DropReason::Malformed)]);
    }

    #[test]
    fn test_urls_and_frames() {
        let protocol = BybitProtocol::new();
        assert_eq!(
            protocol.base_url(Instrument::Spot, false),
            "wss://stream.bybit.com/v5/public/spot"
        );
        assert_eq!(
            protocol.base_url(Instrument::Perp, true),
            "wss://stream-testnet.bybit.com/v5/public/linear"
        );
        assert_eq!(
            protocol.base_url(Instrument::Inverse, false),
            "wss://stream.bybit.com/v5/public/inverse"
        );

        let symbol = Symbol::new("ETH", "USDT").unwrap();
        let frames = protocol.subscribe_frames(&symbol, Instrument::Spot);
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["args"][0], "publicTrade.ETHUSDT");
        assert_eq!(protocol.keepalive().unwrap().0, Duration::from_secs(20));
    }
}

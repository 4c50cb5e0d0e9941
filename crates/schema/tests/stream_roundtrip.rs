//! Random captures recovered through the stream parser.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqx_schema::{
    decode, encode, encode_into, Exchange, Instrument, Side, Symbol, Trade, TradeStreamParser,
    MAX_TIMESTAMP_MS, MIN_TIMESTAMP_MS,
};

const BASES: [&str; 5] = ["BTC", "ETH", "SOL", "DOGE", "1000PEPE"];
const QUOTES: [&str; 3] = ["USDT", "USDC", "BTC"];

fn random_trade(rng: &mut StdRng) -> Trade {
    let exchange = [Exchange::Binance, Exchange::BinancePerp, Exchange::Bybit][rng.gen_range(0..3)];
    let instrument = [Instrument::Spot, Instrument::Perp, Instrument::Inverse][rng.gen_range(0..3)];
    Trade {
        id: rng.gen_range(0..i64::MAX),
        symbol: Symbol::new(
            BASES[rng.gen_range(0..BASES.len())],
            QUOTES[rng.gen_range(0..QUOTES.len())],
        )
        .unwrap(),
        exchange,
        instrument,
        side: if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
        price: rng.gen_range(0.01..=1_000_000.0),
        quantity: rng.gen_range(0.000_001..10_000.0),
        timestamp: rng.gen_range(MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS),
    }
}

#[test]
fn test_ten_thousand_trades_recovered_in_order() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let trades: Vec<Trade> = (0..10_000).map(|_| random_trade(&mut rng)).collect();

    let mut buf = Vec::new();
    for trade in &trades {
        encode_into(trade, &mut buf);
    }

    let mut parser = TradeStreamParser::new(&buf);
    let recovered: Vec<Trade> = parser.by_ref().collect();

    assert_eq!(recovered.len(), trades.len());
    assert_eq!(recovered, trades);
    assert_eq!(parser.skipped(), 0);
}

#[test]
fn test_single_record_roundtrip() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..1_000 {
        let trade = random_trade(&mut rng);
        assert_eq!(decode(&encode(&trade)).unwrap(), trade);
    }
}

#[test]
fn test_recovery_after_corrupt_prefix() {
    let mut rng = StdRng::seed_from_u64(42);
    let trades: Vec<Trade> = (0..100).map(|_| random_trade(&mut rng)).collect();

    let mut buf = vec![0x00, 0x00, 0x00];
    for trade in &trades {
        encode_into(trade, &mut buf);
    }

    let recovered: Vec<Trade> = TradeStreamParser::new(&buf).collect();
    assert_eq!(recovered, trades);
}

fn hostile_length(key: u64, len: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    prost::encoding::encode_varint(key, &mut buf);
    prost::encoding::encode_varint(len, &mut buf);
    buf.resize(buf.len().max(16), 0);
    buf
}

#[test]
fn test_hostile_length_prefixes_terminate() {
    // field 4 and field 10, both length-delimited
    for key in [0x22, 0x52] {
        for len in [u64::MAX, u64::MAX - 10, 1 << 40, 1_000] {
            let buf = hostile_length(key, len);
            let mut parser = TradeStreamParser::new(&buf);
            assert_eq!(parser.by_ref().count(), 0);
            assert_eq!(parser.skipped() + parser.remaining().len(), buf.len());
        }
    }
}

#[test]
fn test_recovery_after_hostile_length_prefix() {
    let mut rng = StdRng::seed_from_u64(99);
    let trades: Vec<Trade> = (0..20).map(|_| random_trade(&mut rng)).collect();

    let mut buf = hostile_length(0x52, u64::MAX - 10);
    buf.truncate(11);
    for trade in &trades {
        encode_into(trade, &mut buf);
    }

    let recovered: Vec<Trade> = TradeStreamParser::new(&buf).collect();
    assert_eq!(recovered, trades);
}

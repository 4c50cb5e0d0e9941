//! Protobuf wire form of [`Trade`].
//!
//! Field numbers: 1=id, 2=exchange, 3=instrument, 4=symbol{1=base,2=quote},
//! 5=side, 7=price, 8=quantity, 9=timestamp. Field 6 is reserved. Every field
//! uses explicit presence so zero values are still written.

use bytes::Bytes;
use prost::encoding::decode_varint;
use prost::Message;

use crate::error::DecodeError;
use crate::model::{Exchange, Instrument, Side, Symbol, Trade};

/// Field numbers a complete record carries.
pub const TRADE_FIELDS: [u32; 8] = [1, 2, 3, 4, 5, 7, 8, 9];
/// Field numbers above this end a record
pub const MAX_FIELD_NUMBER: u64 = 20;
const RESERVED_FIELD: u64 = 6;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

const ALL_FIELDS: u16 = (1 << TRADE_FIELDS.len()) - 1;

fn field_bit(field: u64) -> Option<u16> {
    TRADE_FIELDS
        .iter()
        .position(|&f| u64::from(f) == field)
        .map(|i| 1u16 << i)
}

fn expected_wire_type(field: u64) -> Option<u64> {
    match field {
        1 | 2 | 3 | 5 | 9 => Some(WIRE_VARINT),
        4 => Some(WIRE_LEN),
        7 | 8 => Some(WIRE_FIXED64),
        _ => None,
    }
}

fn corrupt(msg: impl Into<String>) -> DecodeError {
    DecodeError::CorruptFrame(msg.into())
}

/// Read a varint at `buf[offset..]`, returning its value and encoded length.
fn read_varint(buf: &[u8], offset: usize) -> Result<(u64, usize), DecodeError> {
    let mut cursor = buf.get(offset..).ok_or_else(|| corrupt("truncated field"))?;
    let before = cursor.len();
    let value = decode_varint(&mut cursor)?;
    Ok((value, before - cursor.len()))
}

/// Walk the field headers at the start of `buf`.
///
/// Every trade field must appear exactly once with its expected wire type,
/// field 6 and field numbers above [`MAX_FIELD_NUMBER`] are rejected, and no
/// field may start past `max_len`. With `stop_when_complete` the walk ends at
/// the first offset where all fields have been seen; otherwise it must consume
/// the whole buffer. Returns the record length.
pub(crate) fn scan_fields(
    buf: &[u8],
    max_len: usize,
    stop_when_complete: bool,
) -> Result<usize, DecodeError> {
    let mut seen: u16 = 0;
    let mut offset = 0;

    while offset < buf.len() {
        if offset > max_len {
            return Err(corrupt(format!("record longer than {} bytes", max_len)));
        }
        let (key, key_len) = read_varint(buf, offset)?;
        let field = key >> 3;
        let wire_type = key & 0x7;
        if field == 0 || field > MAX_FIELD_NUMBER {
            return Err(corrupt(format!("field number {} out of range", field)));
        }
        if field == RESERVED_FIELD {
            return Err(corrupt("reserved field 6 present"));
        }
        if let Some(expected) = expected_wire_type(field) {
            if expected != wire_type {
                return Err(corrupt(format!(
                    "field {} has wire type {}, expected {}",
                    field, wire_type, expected
                )));
            }
        }
        offset += key_len;

        let remaining = buf.len() - offset;
        let body = match wire_type {
            WIRE_VARINT => read_varint(buf, offset)?.1,
            WIRE_FIXED64 => 8,
            WIRE_LEN => {
                let (len, len_len) = read_varint(buf, offset)?;
                usize::try_from(len)
                    .ok()
                    .and_then(|len| len.checked_add(len_len))
                    .filter(|&body| body <= remaining)
                    .ok_or_else(|| corrupt(format!("field {} length {} exceeds record", field, len)))?
            }
            WIRE_FIXED32 => 4,
            other => return Err(corrupt(format!("unsupported wire type {}", other))),
        };
        if body > remaining {
            return Err(corrupt(format!("field {} truncated", field)));
        }
        offset += body;

        if let Some(bit) = field_bit(field) {
            if seen & bit != 0 {
                return Err(corrupt(format!("duplicate field {}", field)));
            }
            seen |= bit;
            if stop_when_complete && seen == ALL_FIELDS {
                return Ok(offset);
            }
        }
    }

    if seen == ALL_FIELDS {
        Ok(offset)
    } else {
        Err(corrupt("record is missing fields"))
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct WireSymbol {
    #[prost(string, tag = "1")]
    pub base: String,
    #[prost(string, tag = "2")]
    pub quote: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireTrade {
    #[prost(int64, optional, tag = "1")]
    pub id: Option<i64>,
    #[prost(int32, optional, tag = "2")]
    pub exchange: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub instrument: Option<i32>,
    #[prost(message, optional, tag = "4")]
    pub symbol: Option<WireSymbol>,
    #[prost(int32, optional, tag = "5")]
    pub side: Option<i32>,
    #[prost(double, optional, tag = "7")]
    pub price: Option<f64>,
    #[prost(double, optional, tag = "8")]
    pub quantity: Option<f64>,
    #[prost(int64, optional, tag = "9")]
    pub timestamp: Option<i64>,
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, DecodeError> {
    value.ok_or_else(|| DecodeError::CorruptFrame(format!("missing field {}", field)))
}

impl From<&Trade> for WireTrade {
    fn from(trade: &Trade) -> Self {
        Self {
            id: Some(trade.id),
            exchange: Some(trade.exchange as i32),
            instrument: Some(trade.instrument as i32),
            symbol: Some(WireSymbol {
                base: trade.symbol.base.clone(),
                quote: trade.symbol.quote.clone(),
            }),
            side: Some(trade.side as i32),
            price: Some(trade.price),
            quantity: Some(trade.quantity),
            timestamp: Some(trade.timestamp),
        }
    }
}

impl TryFrom<WireTrade> for Trade {
    type Error = DecodeError;

    fn try_from(wire: WireTrade) -> Result<Self, Self::Error> {
        let symbol = require(wire.symbol, "symbol")?;
        Ok(Trade {
            id: require(wire.id, "id")?,
            symbol: Symbol {
                base: symbol.base,
                quote: symbol.quote,
            },
            exchange: Exchange::try_from(require(wire.exchange, "exchange")?)?,
            instrument: Instrument::try_from(require(wire.instrument, "instrument")?)?,
            side: Side::try_from(require(wire.side, "side")?)?,
            price: require(wire.price, "price")?,
            quantity: require(wire.quantity, "quantity")?,
            timestamp: require(wire.timestamp, "timestamp")?,
        })
    }
}

/// Encode a trade into a standalone record.
pub fn encode(trade: &Trade) -> Bytes {
    Bytes::from(WireTrade::from(trade).encode_to_vec())
}

/// Append a record to `buf` without any framing, as the raw stream files expect.
pub fn encode_into(trade: &Trade, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&WireTrade::from(trade).encode_to_vec());
}

/// Decode and validate a single record.
pub fn decode(bytes: &[u8]) -> Result<Trade, DecodeError> {
    scan_fields(bytes, usize::MAX, false)?;
    let wire = WireTrade::decode(bytes)?;
    let trade = Trade::try_from(wire)?;
    trade.validate()?;
    Ok(trade)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trade {
        Trade {
            id: 42,
            symbol: Symbol::new("BTC", "USDT").unwrap(),
            exchange: Exchange::Binance,
            instrument: Instrument::Spot,
            side: Side::Sell,
            price: 30000.5,
            quantity: 0.01,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_encode_decode() {
        let trade = sample();
        let bytes = encode(&trade);
        assert_eq!(decode(&bytes).unwrap(), trade);
    }

    #[test]
    fn test_zero_id_is_written() {
        let mut trade = sample();
        trade.id = 0;
        let bytes = encode(&trade);
        // key for field 1, varint wire type
        assert_eq!(bytes[0], 0x08);
        assert_eq!(decode(&bytes).unwrap().id, 0);
    }

    #[test]
    fn test_missing_field_is_corrupt() {
        let mut wire = WireTrade::from(&sample());
        wire.timestamp = None;
        let bytes = wire.encode_to_vec();
        assert!(matches!(decode(&bytes), Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn test_unknown_enum_value() {
        let mut wire = WireTrade::from(&sample());
        wire.exchange = Some(99);
        let bytes = wire.encode_to_vec();
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnknownEnum { kind: "Exchange", .. })
        ));
    }

    #[test]
    fn test_out_of_range_price() {
        let mut trade = sample();
        trade.price = 0.0;
        let bytes = encode(&trade);
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::RangeViolation { field: "price", .. })
        ));
    }

    fn with_extra_field(key: u64, value: u64) -> Vec<u8> {
        let mut bytes = encode(&sample()).to_vec();
        prost::encoding::encode_varint(key, &mut bytes);
        prost::encoding::encode_varint(value, &mut bytes);
        bytes
    }

    #[test]
    fn test_field_above_twenty_rejected() {
        // field 21, varint
        let bytes = with_extra_field(21 << 3, 1);
        assert!(matches!(decode(&bytes), Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn test_unknown_field_within_range_skipped() {
        let bytes = with_extra_field(12 << 3, 1);
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_reserved_field_rejected() {
        let bytes = with_extra_field(6 << 3, 1);
        assert!(matches!(decode(&bytes), Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn test_repeated_field_rejected() {
        // a second id
        let bytes = with_extra_field(1 << 3, 7);
        assert!(matches!(decode(&bytes), Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut bytes = encode(&sample()).to_vec();
        prost::encoding::encode_varint((12 << 3) | 2, &mut bytes);
        prost::encoding::encode_varint(u64::MAX - 10, &mut bytes);
        assert!(matches!(decode(&bytes), Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff]),
            Err(DecodeError::CorruptFrame(_))
        ));
    }
}

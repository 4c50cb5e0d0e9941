//! Exchange fields to canonical [`Trade`]

use sqx_schema::{DecodeError, Exchange, Instrument, Side, Symbol, Trade};

/// Why an exchange frame produced no trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownSymbol,
    BadDecimal,
    UnknownEnum,
    PriceRange,
    QuantityRange,
    TimestampRange,
}

impl DropReason {
    pub const ALL: &'static [DropReason] = &[
        DropReason::Malformed,
        DropReason::UnknownSymbol,
        DropReason::BadDecimal,
        DropReason::UnknownEnum,
        DropReason::PriceRange,
        DropReason::QuantityRange,
        DropReason::TimestampRange,
    ];

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::UnknownSymbol => "unknown_symbol",
            DropReason::BadDecimal => "bad_decimal",
            DropReason::UnknownEnum => "unknown_enum",
            DropReason::PriceRange => "price_range",
            DropReason::QuantityRange => "quantity_range",
            DropReason::TimestampRange => "timestamp_range",
        }
    }
}

/// Trade fields as an exchange reports them
#[derive(Debug, Clone)]
pub struct RawTrade<'a> {
    pub id: i64,
    /// Concatenated form, e.g. `BTCUSDT`
    pub symbol: &'a str,
    pub side: Side,
    pub price: &'a str,
    pub quantity: &'a str,
    pub timestamp: i64,
}

pub fn parse_decimal(raw: &str) -> Result<f64, DropReason> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DropReason::BadDecimal),
    }
}

/// Build and range-check a trade
pub fn normalize(
    raw: &RawTrade<'_>,
    exchange: Exchange,
    instrument: Instrument,
) -> Result<Trade, DropReason> {
    let symbol = Symbol::split_concatenated(raw.symbol).map_err(|_| DropReason::UnknownSymbol)?;
    let trade = Trade {
        id: raw.id,
        symbol,
        exchange,
        instrument,
        side: raw.side,
        price: parse_decimal(raw.price)?,
        quantity: parse_decimal(raw.quantity)?,
        timestamp: raw.timestamp,
    };
    trade.validate().map_err(|e| match e {
        DecodeError::UnknownEnum { .. } => DropReason::UnknownEnum,
        DecodeError::CorruptFrame(_) => DropReason::UnknownSymbol,
        DecodeError::RangeViolation { field: "price", .. } => DropReason::PriceRange,
        DecodeError::RangeViolation { field: "quantity", .. } => DropReason::QuantityRange,
        DecodeError::RangeViolation { .. } => DropReason::TimestampRange,
    })?;
    Ok(trade)
}

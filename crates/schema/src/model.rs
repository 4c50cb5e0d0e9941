//! Canonical trade record and its enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, SymbolError};

/// Lowest accepted trade price (inclusive)
pub const MIN_PRICE: f64 = 0.01;
/// Highest accepted trade price (inclusive)
pub const MAX_PRICE: f64 = 1_000_000.0;
/// 2020-01-01T00:00:00Z in milliseconds
pub const MIN_TIMESTAMP_MS: i64 = 1_577_836_800_000;
/// 2030-01-01T00:00:00Z in milliseconds
pub const MAX_TIMESTAMP_MS: i64 = 1_893_456_000_000;

/// Quote assets tried, in order, when splitting a concatenated symbol.
pub const QUOTE_SUFFIXES: [&str; 6] = ["USDT", "USDC", "BUSD", "BTC", "ETH", "BNB"];

const SYMBOL_PART_MIN: usize = 2;
const SYMBOL_PART_MAX: usize = 10;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            /// Every variant, including `Unknown`.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn is_unknown(&self) -> bool {
                *self as i32 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            /// Case-insensitive; `-` and `_` are interchangeable.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(DecodeError::UnknownEnum {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = DecodeError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(DecodeError::UnknownEnum {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Exchange the trade was reported by
    Exchange {
        Unknown = 0 => "UNKNOWN",
        Binance = 1 => "BINANCE",
        BinancePerp = 2 => "BINANCE_PERP",
        Bybit = 3 => "BYBIT",
    }
}

wire_enum! {
    /// Market class of the traded contract
    Instrument {
        Unknown = 0 => "UNKNOWN",
        Spot = 1 => "SPOT",
        Margin = 2 => "MARGIN",
        Perp = 3 => "PERP",
        Inverse = 4 => "INVERSE",
        Futures = 5 => "FUTURES",
        Option = 6 => "OPTION",
    }
}

wire_enum! {
    /// Aggressor side of a trade
    Side {
        Unknown = 0 => "UNKNOWN",
        Buy = 1 => "BUY",
        Sell = 2 => "SELL",
    }
}

wire_enum! {
    /// Kind of market data a feed produces
    DataType {
        Unknown = 0 => "UNKNOWN",
        Trade = 1 => "TRADE",
        Depth = 2 => "DEPTH",
        Order = 3 => "ORDER",
    }
}

impl DataType {
    /// Lowercase token used as the first subject segment (`trade.btcusdt`).
    pub fn subject_token(&self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Trade => "trade",
            DataType::Depth => "depth",
            DataType::Order => "order",
        }
    }
}

impl Side {
    /// Taker side from an exchange "buyer is maker" flag.
    #[inline]
    pub fn from_buyer_maker(buyer_is_maker: bool) -> Self {
        if buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// Base/quote pair. Both parts are uppercase, 2 to 10 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

fn check_part(part: &str) -> Result<(), SymbolError> {
    let len = part.chars().count();
    if !(SYMBOL_PART_MIN..=SYMBOL_PART_MAX).contains(&len) {
        return Err(SymbolError::Length(part.to_string()));
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(SymbolError::NotUppercase(part.to_string()));
    }
    Ok(())
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, SymbolError> {
        let symbol = Self {
            base: base.into(),
            quote: quote.into(),
        };
        symbol.validate()?;
        Ok(symbol)
    }

    pub fn validate(&self) -> Result<(), SymbolError> {
        check_part(&self.base)?;
        check_part(&self.quote)
    }

    /// Split an exchange-native symbol such as `BTCUSDT` by matching the
    /// known quote suffixes in order.
    pub fn split_concatenated(raw: &str) -> Result<Self, SymbolError> {
        let upper = raw.trim().to_ascii_uppercase();
        for quote in QUOTE_SUFFIXES {
            if let Some(base) = upper.strip_suffix(quote) {
                if base.is_empty() {
                    continue;
                }
                return Self::new(base, quote);
            }
        }
        Err(SymbolError::UnknownQuote(raw.to_string()))
    }

    /// `BTCUSDT`
    pub fn concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// `btcusdt`
    pub fn lower(&self) -> String {
        self.concatenated().to_ascii_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    /// Parses the canonical `BASE-QUOTE` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('-')
            .ok_or_else(|| SymbolError::Format(s.to_string()))?;
        Self::new(base.trim().to_ascii_uppercase(), quote.trim().to_ascii_uppercase())
    }
}

/// Normalized trade as emitted by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub instrument: Instrument,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// Exchange event time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Trade {
    /// `EXCHANGE-INSTRUMENT-BASE-QUOTE-ID`
    pub fn id_str(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.exchange, self.instrument, self.symbol, self.id
        )
    }

    /// Checks enum presence, symbol shape and the price, quantity and time windows.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.exchange.is_unknown() {
            return Err(DecodeError::unknown("Exchange", self.exchange));
        }
        if self.instrument.is_unknown() {
            return Err(DecodeError::unknown("Instrument", self.instrument));
        }
        if self.side.is_unknown() {
            return Err(DecodeError::unknown("Side", self.side));
        }
        self.symbol
            .validate()
            .map_err(|e| DecodeError::CorruptFrame(e.to_string()))?;
        if !(MIN_PRICE..=MAX_PRICE).contains(&self.price) {
            return Err(DecodeError::RangeViolation {
                field: "price",
                value: self.price.to_string(),
            });
        }
        if !(self.quantity > 0.0 && self.quantity.is_finite()) {
            return Err(DecodeError::RangeViolation {
                field: "quantity",
                value: self.quantity.to_string(),
            });
        }
        if !(MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&self.timestamp) {
            return Err(DecodeError::RangeViolation {
                field: "timestamp",
                value: self.timestamp.to_string(),
            });
        }
        Ok(())
    }
}

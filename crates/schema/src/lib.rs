//! sqx-schema: canonical market data records
//!
//! The [`Trade`] record, its enumerations, the protobuf codec and the raw
//! stream parser used by the capture tools.

pub mod codec;
pub mod error;
pub mod model;
pub mod stream;

pub use codec::{decode, encode, encode_into, WireSymbol, WireTrade};
pub use error::{DecodeError, SymbolError};
pub use model::{
    DataType, Exchange, Instrument, Side, Symbol, Trade, MAX_PRICE, MAX_TIMESTAMP_MS, MIN_PRICE,
    MIN_TIMESTAMP_MS, QUOTE_SUFFIXES,
};
pub use stream::TradeStreamParser;

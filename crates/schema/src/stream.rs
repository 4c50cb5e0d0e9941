//! Recovery of trade records from an unframed byte stream.
//!
//! Raw capture files are records concatenated back to back with no length
//! prefix. The parser walks field headers from a candidate offset until every
//! expected field has been seen exactly once, trial-decodes that span, and
//! advances a single byte whenever the candidate is rejected. This tolerates
//! garbage prefixes and a torn record at either end of the file.

use crate::codec::{decode, scan_fields};
use crate::model::Trade;

/// Shortest span worth attempting
pub const MIN_RECORD_LEN: usize = 10;
/// A candidate whose fields run past this offset is abandoned
pub const MAX_RECORD_LEN: usize = 200;

/// Iterator over the trades recoverable from a raw capture.
pub struct TradeStreamParser<'a> {
    buf: &'a [u8],
    pos: usize,
    skipped: usize,
    recovered: usize,
}

impl<'a> TradeStreamParser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            skipped: 0,
            recovered: 0,
        }
    }

    /// Bytes stepped over while searching for a record
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Records returned so far
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// Bytes not yet consumed (a torn tail stays here)
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl Iterator for TradeStreamParser<'_> {
    type Item = Trade;

    fn next(&mut self) -> Option<Trade> {
        while self.buf.len() - self.pos >= MIN_RECORD_LEN {
            let candidate = &self.buf[self.pos..];
            if let Ok(len) = scan_fields(candidate, MAX_RECORD_LEN, true) {
                if let Ok(trade) = decode(&candidate[..len]) {
                    self.pos += len;
                    self.recovered += 1;
                    return Some(trade);
                }
            }
            self.pos += 1;
            self.skipped += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_into;
    use crate::model::{Exchange, Instrument, Side, Symbol};

    fn trade(id: i64) -> Trade {
        Trade {
            id,
            symbol: Symbol::new("ETH", "USDT").unwrap(),
            exchange: Exchange::Bybit,
            instrument: Instrument::Perp,
            side: if id % 2 == 0 { Side::Buy } else { Side::Sell },
            price: 2000.0 + id as f64,
            quantity: 0.5,
            timestamp: 1_700_000_000_000 + id,
        }
    }

    fn stream(ids: &[i64]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &id in ids {
            encode_into(&trade(id), &mut buf);
        }
        buf
    }

    #[test]
    fn test_clean_stream() {
        let buf = stream(&[1, 2, 3]);
        let mut parser = TradeStreamParser::new(&buf);
        let ids: Vec<i64> = parser.by_ref().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(parser.skipped(), 0);
        assert!(parser.remaining().is_empty());
    }

    #[test]
    fn test_garbage_prefix() {
        let mut buf = vec![0xff, 0x00, 0x13, 0x37, 0xff, 0xff, 0x01];
        buf.extend(stream(&[10, 11]));
        let mut parser = TradeStreamParser::new(&buf);
        let trades: Vec<Trade> = parser.by_ref().collect();
        assert_eq!(trades, vec![trade(10), trade(11)]);
        assert_eq!(parser.skipped(), 7);
    }

    #[test]
    fn test_torn_tail() {
        let mut buf = stream(&[1, 2, 3]);
        buf.truncate(buf.len() - 5);
        let recovered: Vec<i64> = TradeStreamParser::new(&buf).map(|t| t.id).collect();
        assert_eq!(recovered, vec![1, 2]);
    }

    #[test]
    fn test_short_input() {
        assert_eq!(TradeStreamParser::new(&[0x08, 0x01]).count(), 0);
    }

    #[test]
    fn test_invalid_record_skipped() {
        let mut bad = trade(5);
        bad.timestamp = 0;
        let mut buf = Vec::new();
        encode_into(&bad, &mut buf);
        encode_into(&trade(6), &mut buf);
        let recovered: Vec<i64> = TradeStreamParser::new(&buf).map(|t| t.id).collect();
        assert_eq!(recovered, vec![6]);
    }
}

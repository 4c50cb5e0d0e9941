//! Conversions between JSON-lines trades and raw capture streams

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqx_schema::{encode_into, Trade, TradeStreamParser};

/// Encode one JSON trade per line into back-to-back records. Blank lines
/// are skipped; a bad or out-of-range line fails with its line number.
pub fn serialize<R: BufRead, W: Write>(input: R, mut output: W) -> Result<usize> {
    let mut buf = Vec::with_capacity(64);
    let mut written = 0;
    for (idx, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let trade: Trade = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid trade JSON", idx + 1))?;
        trade
            .validate()
            .with_context(|| format!("line {}: {}", idx + 1, trade.id_str()))?;
        buf.clear();
        encode_into(&trade, &mut buf);
        output.write_all(&buf)?;
        written += 1;
    }
    output.flush()?;
    Ok(written)
}

/// Recover every trade from a raw stream and write them as JSON lines
pub fn deserialize<W: Write>(raw: &[u8], mut output: W) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut parser = TradeStreamParser::new(raw);
    for trade in parser.by_ref() {
        serde_json::to_writer(&mut output, &trade)?;
        output.write_all(b"\n")?;
        summary.record(&trade);
    }
    summary.finish(&parser);
    output.flush()?;
    Ok(summary)
}

/// Counters gathered while replaying a capture
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub recovered: usize,
    pub skipped_bytes: usize,
    pub torn_tail_bytes: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    /// Keyed by `BASE-QUOTE`
    pub per_symbol: BTreeMap<String, usize>,
}

impl ReplaySummary {
    pub fn record(&mut self, trade: &Trade) {
        self.recovered += 1;
        self.first_timestamp.get_or_insert(trade.timestamp);
        self.last_timestamp = Some(trade.timestamp);
        *self.per_symbol.entry(trade.symbol.to_string()).or_default() += 1;
    }

    /// Copy the parser's byte accounting once it is exhausted
    pub fn finish(&mut self, parser: &TradeStreamParser<'_>) {
        self.skipped_bytes = parser.skipped();
        self.torn_tail_bytes = parser.remaining().len();
    }
}

fn format_ts(ms: Option<i64>) -> String {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records recovered: {}", self.recovered)?;
        writeln!(f, "bytes skipped:     {}", self.skipped_bytes + self.torn_tail_bytes)?;
        writeln!(f, "first timestamp:   {}", format_ts(self.first_timestamp))?;
        writeln!(f, "last timestamp:    {}", format_ts(self.last_timestamp))?;
        for (symbol, count) in &self.per_symbol {
            writeln!(f, "  {:<12} {}", symbol, count)?;
        }
        Ok(())
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use sqx_schema::{DataType, Symbol};

/// Helper for subject formatting: `[prefix.]<kind>.<symbol-lower>`.
/// Trade subjects are cached so every publish for a symbol shares one `Arc<str>`.
pub struct SubjectBuilder {
    /// Pre-computed prefix with trailing dot, empty when unprefixed
    base_prefix: Arc<str>,
    /// Pre-computed prefix: "{prefix}trade."
    trade_prefix: Arc<str>,
    /// Cache of concatenated symbol -> full trade subject
    trade_cache: DashMap<String, Arc<str>>,
}

impl SubjectBuilder {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    /// Prefix every subject, e.g. `prod` gives `prod.trade.btcusdt`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let base_prefix: Arc<str> = if prefix.is_empty() {
            "".into()
        } else {
            format!("{}.", prefix).into()
        };
        let trade_prefix: Arc<str> =
            format!("{}{}.", base_prefix, DataType::Trade.subject_token()).into();

        Self {
            base_prefix,
            trade_prefix,
            trade_cache: DashMap::new(),
        }
    }

    /// Build subject for trade messages: `trade.<symbol-lower>`.
    #[inline]
    pub fn trade(&self, symbol: &Symbol) -> Arc<str> {
        let key = symbol.lower();
        if let Some(cached) = self.trade_cache.get(&key) {
            return Arc::clone(cached.value());
        }

        let subject: Arc<str> = format!("{}{}", self.trade_prefix, key).into();
        self.trade_cache.insert(key, Arc::clone(&subject));
        subject
    }

    /// Subject for any data kind, not cached
    pub fn for_kind(&self, kind: DataType, symbol: &Symbol) -> String {
        format!("{}{}.{}", self.base_prefix, kind.subject_token(), symbol.lower())
    }

    /// Wildcard over every symbol of one kind: `trade.>`
    pub fn all(&self, kind: DataType) -> String {
        format!("{}{}.>", self.base_prefix, kind.subject_token())
    }

    /// Request/reply subject for one feed's control plane
    pub fn control(&self, feed: &str) -> String {
        format!("{}control.{}", self.base_prefix, sanitize_subject_token(feed))
    }
}

impl Default for SubjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace characters that carry meaning in subjects
pub fn sanitize_subject_token(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            c => c,
        })
        .collect()
}

/// Whether `subject` matches `pattern`, where `*` matches one token and a
/// trailing `>` matches one or more tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Symbol {
        Symbol::new("BTC", "USDT").unwrap()
    }

    #[test]
    fn test_trade_subject() {
        let builder = SubjectBuilder::new();
        assert_eq!(builder.trade(&btc()).as_ref(), "trade.btcusdt");
    }

    #[test]
    fn test_trade_subject_cached() {
        let builder = SubjectBuilder::new();
        let first = builder.trade(&btc());
        let second = builder.trade(&btc());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_prefixed_subjects() {
        let builder = SubjectBuilder::with_prefix("prod");
        assert_eq!(builder.trade(&btc()).as_ref(), "prod.trade.btcusdt");
        assert_eq!(builder.for_kind(DataType::Depth, &btc()), "prod.depth.btcusdt");
        assert_eq!(builder.all(DataType::Trade), "prod.trade.>");
        assert_eq!(builder.control("binance.btc"), "prod.control.binance_btc");
    }

    #[test]
    fn test_wildcards() {
        assert!(subject_matches("trade.>", "trade.btcusdt"));
        assert!(subject_matches("trade.>", "trade.btcusdt.extra"));
        assert!(!subject_matches("trade.>", "trade"));
        assert!(subject_matches("*.btcusdt", "depth.btcusdt"));
        assert!(!subject_matches("*.btcusdt", "depth.ethusdt"));
        assert!(subject_matches("trade.btcusdt", "trade.btcusdt"));
        assert!(!subject_matches("trade.btcusdt", "trade.btcusdt.x"));
        assert!(!subject_matches("trade.>.x", "trade.a.x"));
    }
}

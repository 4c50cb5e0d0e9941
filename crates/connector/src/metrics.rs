//! Prometheus metrics for feed sessions and their fan-outs

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::normalize::DropReason;

const LABEL_FEED: &str = "feed";
const LABEL_REASON: &str = "reason";
const LABEL_RESULT: &str = "result";

static TRADES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_trades_received_total",
        "Normalized trades handed to subscription callbacks",
        &[LABEL_FEED]
    )
    .expect("Failed to register trades_received metric")
});

static TRADES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_trades_dropped_total",
        "Exchange frames dropped during normalization",
        &[LABEL_FEED, LABEL_REASON]
    )
    .expect("Failed to register trades_dropped metric")
});

static RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_reconnects_total",
        "Websocket sessions interrupted and scheduled for reconnect",
        &[LABEL_FEED]
    )
    .expect("Failed to register reconnects metric")
});

/// 1 = subscribed, 0 = not
static WEBSOCKET_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "sqx_connector_websocket_connected",
        "Websocket connection status per feed (1=connected, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register websocket_connected metric")
});

static BUS_PUBLISH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_bus_publish_failures_total",
        "Trades rejected by the in-process bus",
        &[LABEL_FEED]
    )
    .expect("Failed to register bus_publish_failures metric")
});

static FORWARD_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_forward_dropped_total",
        "Trades dropped because the broker forward queue was full",
        &[LABEL_FEED]
    )
    .expect("Failed to register forward_dropped metric")
});

static BROKER_PUBLISHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sqx_connector_broker_publishes_total",
        "Durable broker publishes by result",
        &[LABEL_FEED, LABEL_RESULT]
    )
    .expect("Failed to register broker_publishes metric")
});

/// Metrics handle bound to one feed
#[derive(Clone, Debug)]
pub struct FeedMetrics {
    feed: String,
}

impl FeedMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn inc_received(&self) {
        TRADES_RECEIVED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_dropped(&self, reason: DropReason) {
        TRADES_DROPPED
            .with_label_values(&[&self.feed, reason.label()])
            .inc();
    }

    pub fn inc_reconnects(&self) {
        RECONNECTS.with_label_values(&[&self.feed]).inc();
    }

    pub fn set_connected(&self, connected: bool) {
        WEBSOCKET_CONNECTED
            .with_label_values(&[&self.feed])
            .set(i64::from(connected));
    }

    pub fn inc_bus_failures(&self) {
        BUS_PUBLISH_FAILURES.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_forward_dropped(&self) {
        FORWARD_DROPPED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_broker_publish(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        BROKER_PUBLISHES
            .with_label_values(&[&self.feed, result])
            .inc();
    }

    pub fn received(&self) -> u64 {
        TRADES_RECEIVED.with_label_values(&[&self.feed]).get()
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        TRADES_DROPPED
            .with_label_values(&[&self.feed, reason.label()])
            .get()
    }

    pub fn dropped_total(&self) -> u64 {
        DropReason::ALL.iter().map(|r| self.dropped(*r)).sum()
    }

    pub fn reconnects(&self) -> u64 {
        RECONNECTS.with_label_values(&[&self.feed]).get()
    }

    pub fn bus_failures(&self) -> u64 {
        BUS_PUBLISH_FAILURES.with_label_values(&[&self.feed]).get()
    }

    pub fn forward_dropped(&self) -> u64 {
        FORWARD_DROPPED.with_label_values(&[&self.feed]).get()
    }
}

/// Encode all registered metrics in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

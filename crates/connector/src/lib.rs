//! sqx-connector: exchange trade adapters and the feed runtime around them
//!
//! Adapters are built from an [`AdapterRegistry`] keyed by (exchange, data
//! kind). Each subscription runs one websocket session task that normalizes
//! exchange frames into [`sqx_schema::Trade`] records and hands them to a
//! callback; [`FeedRunner`] wires that callback to the event bus and the
//! durable publishers.

pub mod binance;
pub mod bybit;
pub mod control;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod normalize;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod server;
pub mod traits;
pub mod websocket;

pub use control::{ControlClient, ControlCommand, ControlReply, ControlResponder, FeedStatus};
pub use error::{ConnectorError, ResolverError};
pub use handle::{SessionState, SubscriptionHandle};
pub use metrics::{encode_metrics, FeedMetrics};
pub use normalize::{normalize, DropReason, RawTrade};
pub use registry::{AdapterContext, AdapterFactory, AdapterRegistry, AdapterRegistryBuilder};
pub use resolver::EnvResolver;
pub use runner::{FeedRunner, FeedSinks, DEFAULT_FORWARD_QUEUE};
pub use server::{create_router, run_server, ServerState};
pub use traits::{KeyResolver, TradeAdapter, TradeCallback};
pub use websocket::{SessionTiming, StreamingAdapter, TradeProtocol};

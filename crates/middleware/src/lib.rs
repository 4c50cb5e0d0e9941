//! sqx-middleware: messaging fabric for the feed runtime
//!
//! Transport abstraction over NATS/JetStream with an in-memory twin, the
//! in-process event bus, and durable publishers that forward records into
//! limits-retention broker streams.

pub mod backoff;
pub mod bus;
pub mod error;
pub mod factory;
pub mod journal;
pub mod latency;
pub mod memory;
pub mod nats;
pub mod publisher;
pub mod transport;

pub use backoff::Backoff;
pub use bus::{BusReceiver, EventBus, Unsubscribe};
pub use error::{BusError, JournalError, PublishError, TransportError};
pub use factory::{FactoryError, MiddlewareFactory};
pub use journal::{Journal, JournalEntry, JournalInfo, StreamSpec, StreamStorage};
pub use memory::{InMemoryJournal, InMemoryTransport};
pub use nats::{subject_matches, NatsTransport, SubjectBuilder};
pub use publisher::{
    trade_headers, DurablePublisher, PubManager, CONTENT_TYPE_PROTOBUF, HEADER_CONTENT_TYPE,
    HEADER_MESSAGE_TYPE, HEADER_MSG_ID,
};
pub use transport::{Subscription, Transport, TransportMessage};

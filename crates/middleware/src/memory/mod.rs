//! In-memory implementations for testing
pub mod journal;
pub mod transport;

pub use journal::InMemoryJournal;
pub use transport::InMemoryTransport;

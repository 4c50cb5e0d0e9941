pub mod subjects;
mod transport;

pub use subjects::{sanitize_subject_token, subject_matches, SubjectBuilder};
pub use transport::NatsTransport;

use std::fmt::Display;

use thiserror::Error;

/// Why a record failed to decode or validate. Callers skip the record and continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    #[error("unknown {kind} value: {value}")]
    UnknownEnum { kind: &'static str, value: String },
    #[error("{field} out of range: {value}")]
    RangeViolation { field: &'static str, value: String },
}

impl DecodeError {
    pub(crate) fn unknown(kind: &'static str, value: impl Display) -> Self {
        DecodeError::UnknownEnum {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<prost::DecodeError> for DecodeError {
    fn from(e: prost::DecodeError) -> Self {
        DecodeError::CorruptFrame(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol part must be 2-10 characters: {0:?}")]
    Length(String),
    #[error("symbol part must be uppercase: {0:?}")]
    NotUppercase(String),
    #[error("expected BASE-QUOTE, got {0:?}")]
    Format(String),
    #[error("no known quote suffix in {0:?}")]
    UnknownQuote(String),
}

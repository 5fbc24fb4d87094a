//! Decoding of row cells into [`CqlValue`](crate::value::CqlValue)s and the
//! lazily decoded row sets built on top of it.
//!
//! A RESULT:Rows body is split into raw cells once, when the response is
//! parsed. Cells stay undecoded until a value is requested through a
//! [`Row`](row::Row), by column index or by column name.

pub mod result;
pub mod row;
pub mod value;

use thiserror::Error;

use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::response::result::ColumnType;

/// A cell could not be decoded as a value of its column type.
#[derive(Error, Debug, Clone)]
#[error("Failed to deserialize a value of CQL type {cql_type:?}: {kind}")]
pub struct DeserializationError {
    pub cql_type: ColumnType,
    pub kind: DeserializationErrorKind,
}

impl DeserializationError {
    pub(crate) fn new(cql_type: &ColumnType, kind: DeserializationErrorKind) -> Self {
        Self {
            cql_type: cql_type.clone(),
            kind,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DeserializationErrorKind {
    #[error("the CQL type requires {expected} bytes, but got {got}")]
    ByteLengthMismatch { expected: usize, got: usize },
    #[error("expected a valid ASCII string")]
    ExpectedAscii,
    #[error(transparent)]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("the length of read value in bytes ({got}) is not suitable for IP address; expected 4 or 16")]
    BadInetLength { got: usize },
    #[error("read value is out of representable range")]
    ValueOverflow,
    #[error("custom type {0} is not supported")]
    CustomTypeNotSupported(String),
    #[error("collection element is null")]
    NullCollectionElement,
    #[error("failed to read raw bytes: {0}")]
    RawBytesReadError(#[from] LowLevelDeserializationError),
    #[error("value has {0} trailing bytes")]
    TrailingBytes(usize),
}

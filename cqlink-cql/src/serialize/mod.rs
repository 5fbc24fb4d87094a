//! Encoding of bound values into the `[value]` lists of QUERY, EXECUTE and
//! BATCH requests.
//!
//! Values bound to prepared statements are checked against the column types
//! the server returned when preparing; a value of the wrong CQL type is
//! reported as an error instead of being silently re-encoded.

pub mod value;
pub mod values;

use thiserror::Error;

use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::response::result::ColumnType;

pub use value::serialize_cql_value;
pub use values::SerializedValues;

/// An error that occurred while serializing a bound value.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SerializationError {
    #[error("Failed to serialize a value as CQL type {cql_type:?}: {kind}")]
    Value {
        cql_type: ColumnType,
        kind: SerializationErrorKind,
    },
    #[error("Too many values, at most {} can be bound to a statement", u16::MAX)]
    TooManyValues,
    #[error("Unset values are not supported by protocol {0}")]
    UnsetNotSupported(ProtocolVersion),
    #[error("Statement expects {expected} values, but {actual} were given")]
    ValueCountMismatch { expected: usize, actual: usize },
}

impl SerializationError {
    pub(crate) fn new(cql_type: &ColumnType, kind: SerializationErrorKind) -> Self {
        Self::Value {
            cql_type: cql_type.clone(),
            kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SerializationErrorKind {
    #[error("a {value} value cannot be serialized as this type")]
    MismatchedType { value: &'static str },
    #[error("string contains non-ASCII characters")]
    NonAsciiString,
    #[error("value is out of the range of the CQL type")]
    ValueOverflow,
    #[error("value of {0} bytes does not fit its length field")]
    ValueTooLarge(usize),
    #[error("tuple of {actual} elements given for a tuple type of {expected}")]
    TupleArityMismatch { expected: usize, actual: usize },
    #[error("value of UDT {keyspace}.{type_name} given for a different UDT")]
    UdtNameMismatch { keyspace: String, type_name: String },
    #[error("UDT has no field named {0}")]
    UdtNoSuchField(String),
    #[error("type requires protocol v3 or newer, got {0}")]
    UnsupportedInVersion(ProtocolVersion),
    #[error("custom type {0} is not supported")]
    CustomTypeNotSupported(String),
}

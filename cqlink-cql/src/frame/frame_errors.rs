//! Errors that may occur while reading, writing and parsing frames.

use std::num::TryFromIntError;
use std::sync::Arc;

pub use super::request::CqlRequestSerializationError;
use super::protocol_version::ProtocolVersion;
use super::TryFromPrimitiveError;
use crate::errors::CqlResponseKind;
use thiserror::Error;

/// An error that occurred while reading a frame header or body from the stream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FrameHeaderParseError {
    #[error("Failed to read the frame header: {0}")]
    HeaderIoError(std::io::Error),
    #[error("Received frame marked as coming from a client")]
    FrameFromClient,
    #[error("Received frame marked as coming from the server")]
    FrameFromServer,
    #[error("Received a frame of protocol {received:#04x}, but {expected} was negotiated")]
    VersionMismatch {
        expected: ProtocolVersion,
        received: u8,
    },
    #[error("Received a frame from version {0}, which is not supported")]
    VersionNotSupported(u8),
    #[error("Unrecognized response opcode {0}")]
    InvalidOpcode(u8),
    #[error("Frame body is {0} bytes long, which exceeds the maximum frame size")]
    FrameTooLarge(usize),
    #[error("Failed to read a chunk of the frame body: {0}")]
    BodyChunkIoError(std::io::Error),
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),
}

/// An error that occurred while stripping compression and extensions
/// (tracing id, warnings, custom payload) off the frame body.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum FrameBodyExtensionsParseError {
    #[error("Frame is compressed, but no compression negotiated for connection.")]
    NoCompressionNegotiated,
    #[error("Malformed tracing id: {0}")]
    TraceIdParse(LowLevelDeserializationError),
    #[error("Malformed warnings list: {0}")]
    WarningsListParse(LowLevelDeserializationError),
    #[error("Malformed custom payload map: {0}")]
    CustomPayloadMapParse(LowLevelDeserializationError),
    #[error("Snap decompression error: {0}")]
    SnapDecompressError(Arc<snap::Error>),
    #[error("Error decompressing lz4 data {0}")]
    Lz4DecompressError(Arc<lz4_flex::block::DecompressError>),
    #[error("Compressed frame is too short to hold the uncompressed length")]
    Lz4MissingLength,
}

/// An error that occurred while deserializing the body of a response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlResponseParseError {
    #[error("Failed to deserialize ERROR response: {0}")]
    CqlErrorParseError(#[from] CqlErrorParseError),
    #[error("Failed to deserialize AUTH_CHALLENGE response: {0}")]
    CqlAuthChallengeParseError(LowLevelDeserializationError),
    #[error("Failed to deserialize AUTH_SUCCESS response: {0}")]
    CqlAuthSuccessParseError(LowLevelDeserializationError),
    #[error("Failed to deserialize AUTHENTICATE response: {0}")]
    CqlAuthenticateParseError(LowLevelDeserializationError),
    #[error("Failed to deserialize SUPPORTED response: {0}")]
    CqlSupportedParseError(LowLevelDeserializationError),
    #[error("Failed to deserialize EVENT response: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),
    #[error(transparent)]
    CqlResultParseError(#[from] CqlResultParseError),
}

impl CqlResponseParseError {
    /// Kind of the response that could not be parsed.
    pub fn to_response_kind(&self) -> CqlResponseKind {
        match self {
            CqlResponseParseError::CqlErrorParseError(_) => CqlResponseKind::Error,
            CqlResponseParseError::CqlAuthChallengeParseError(_) => CqlResponseKind::AuthChallenge,
            CqlResponseParseError::CqlAuthSuccessParseError(_) => CqlResponseKind::AuthSuccess,
            CqlResponseParseError::CqlAuthenticateParseError(_) => CqlResponseKind::Authenticate,
            CqlResponseParseError::CqlSupportedParseError(_) => CqlResponseKind::Supported,
            CqlResponseParseError::CqlEventParseError(_) => CqlResponseKind::Event,
            CqlResponseParseError::CqlResultParseError(_) => CqlResponseKind::Result,
        }
    }
}

/// An error type returned when deserialization of ERROR response fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlErrorParseError {
    #[error("Malformed error code: {0}")]
    ErrorCodeParseError(LowLevelDeserializationError),
    #[error("Malformed error reason: {0}")]
    ReasonParseError(LowLevelDeserializationError),
    #[error("Malformed error field {field} of DB error {db_error}: {err}")]
    MalformedErrorField {
        db_error: &'static str,
        field: &'static str,
        err: LowLevelDeserializationError,
    },
}

/// An error type returned when deserialization of RESULT response fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlResultParseError {
    #[error("Malformed RESULT response id: {0}")]
    ResultIdParseError(LowLevelDeserializationError),
    #[error("Unknown RESULT response id: {0}")]
    UnknownResultId(i32),
    #[error("RESULT:Set_keyspace response deserialization failed: {0}")]
    SetKeyspaceParseError(LowLevelDeserializationError),
    #[error("RESULT:Schema_change response deserialization failed: {0}")]
    SchemaChangeParseError(#[from] SchemaChangeEventParseError),
    #[error("RESULT:Prepared response deserialization failed: {0}")]
    PreparedParseError(#[from] PreparedParseError),
    #[error("RESULT:Rows response deserialization failed: {0}")]
    RowsParseError(#[from] RowsParseError),
}

/// An error that occurred while deserializing result metadata of a RESULT:Rows response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ResultMetadataParseError {
    #[error("Invalid result metadata flags: {0}")]
    FlagsParseError(LowLevelDeserializationError),
    #[error("Invalid result metadata columns count: {0}")]
    ColumnCountParseError(LowLevelDeserializationError),
    #[error("Invalid result metadata paging state: {0}")]
    PagingStateParseError(LowLevelDeserializationError),
    #[error("Invalid new result metadata id: {0}")]
    NewMetadataIdParseError(LowLevelDeserializationError),
    #[error("Invalid global table spec: {0}")]
    GlobalTableSpecParseError(LowLevelDeserializationError),
    #[error("Invalid spec of column {column_index}: {kind}")]
    ColumnSpecParseError {
        column_index: usize,
        kind: ColumnSpecParseErrorKind,
    },
}

/// An error that occurred while deserializing bind markers metadata of a RESULT:Prepared response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PreparedMetadataParseError {
    #[error("Invalid prepared metadata flags: {0}")]
    FlagsParseError(LowLevelDeserializationError),
    #[error("Invalid prepared metadata columns count: {0}")]
    ColumnCountParseError(LowLevelDeserializationError),
    #[error("Invalid partition key count: {0}")]
    PkCountParseError(LowLevelDeserializationError),
    #[error("Invalid partition key index: {0}")]
    PkIndexParseError(LowLevelDeserializationError),
    #[error("Partition key index {index} out of bounds of {col_count} columns")]
    PkIndexOutOfBounds { index: u16, col_count: usize },
    #[error("Invalid global table spec: {0}")]
    GlobalTableSpecParseError(LowLevelDeserializationError),
    #[error("Invalid spec of bind marker {column_index}: {kind}")]
    ColumnSpecParseError {
        column_index: usize,
        kind: ColumnSpecParseErrorKind,
    },
}

/// Reason why a single column spec could not be deserialized.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ColumnSpecParseErrorKind {
    #[error("Invalid table spec: {0}")]
    TableSpecParseError(LowLevelDeserializationError),
    #[error("Invalid column name: {0}")]
    ColumnNameParseError(LowLevelDeserializationError),
    #[error("Invalid column type: {0}")]
    ColumnTypeParseError(#[from] CqlTypeParseError),
}

/// An error that occurred while decoding a type descriptor.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlTypeParseError {
    #[error("Invalid type id: {0}")]
    TypeIdParseError(LowLevelDeserializationError),
    #[error("Invalid custom type class name: {0}")]
    CustomTypeNameParseError(LowLevelDeserializationError),
    #[error("Invalid name of UDT: {0}")]
    UdtNameParseError(LowLevelDeserializationError),
    #[error("Invalid UDT fields count: {0}")]
    UdtFieldsCountParseError(LowLevelDeserializationError),
    #[error("Invalid UDT field name: {0}")]
    UdtFieldNameParseError(LowLevelDeserializationError),
    #[error("Invalid tuple length: {0}")]
    TupleLengthParseError(LowLevelDeserializationError),
    #[error("Type not yet implemented, id: {0:#06x}")]
    TypeNotImplemented(u16),
    #[error("Type id {type_id:#06x} is not supported by protocol {version}")]
    TypeNotSupportedInVersion {
        type_id: u16,
        version: ProtocolVersion,
    },
}

/// An error that occurred while deserializing a RESULT:Prepared response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PreparedParseError {
    #[error("Malformed prepared statement id: {0}")]
    IdParseError(LowLevelDeserializationError),
    #[error("Malformed prepared statement result metadata id: {0}")]
    ResultMetadataIdParseError(LowLevelDeserializationError),
    #[error("Invalid result metadata: {0}")]
    ResultMetadataParseError(#[from] ResultMetadataParseError),
    #[error("Invalid prepared metadata: {0}")]
    PreparedMetadataParseError(#[from] PreparedMetadataParseError),
}

/// An error that occurred while deserializing a RESULT:Rows response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RowsParseError {
    #[error("Invalid result metadata: {0}")]
    ResultMetadataParseError(#[from] ResultMetadataParseError),
    #[error("Invalid rows count: {0}")]
    RowsCountParseError(LowLevelDeserializationError),
    #[error("Rows response is missing its metadata and no cached metadata was supplied")]
    MissingMetadata,
    #[error("Malformed cell in row {row_index}, column {column_index}: {err}")]
    CellParseError {
        row_index: usize,
        column_index: usize,
        err: LowLevelDeserializationError,
    },
    #[error("Rows response has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// An error that occurred while deserializing an EVENT response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlEventParseError {
    #[error("Malformed event type string: {0}")]
    EventTypeParseError(LowLevelDeserializationError),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Failed to deserialize schema change event: {0}")]
    SchemaChangeEventParseError(#[from] SchemaChangeEventParseError),
    #[error("Failed to deserialize topology change event: {0}")]
    TopologyChangeEventParseError(ClusterChangeEventParseError),
    #[error("Failed to deserialize status change event: {0}")]
    StatusChangeEventParseError(ClusterChangeEventParseError),
}

/// An error that occurred while deserializing a schema change event
/// or a RESULT:Schema_change response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SchemaChangeEventParseError {
    #[error("Malformed schema change type string: {0}")]
    TypeOfChangeParseError(LowLevelDeserializationError),
    #[error("Malformed schema change target string: {0}")]
    TargetTypeParseError(LowLevelDeserializationError),
    #[error("Malformed name of keyspace affected by schema change: {0}")]
    AffectedKeyspaceParseError(LowLevelDeserializationError),
    #[error("Malformed name of the target affected by schema change: {0}")]
    AffectedTargetNameParseError(LowLevelDeserializationError),
    #[error("Malformed arguments list of the function affected by schema change: {0}")]
    ArgumentsParseError(LowLevelDeserializationError),
    #[error("Unknown type of schema change: {0}")]
    UnknownTypeOfChange(String),
    #[error("Unknown target of schema change: {0}")]
    UnknownTargetOfSchemaChange(String),
}

/// An error that occurred while deserializing a topology or status change event.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClusterChangeEventParseError {
    #[error("Malformed type of change: {0}")]
    TypeOfChangeParseError(LowLevelDeserializationError),
    #[error("Unknown type of change: {0}")]
    UnknownTypeOfChange(String),
    #[error("Malformed node address: {0}")]
    NodeAddressParseError(LowLevelDeserializationError),
}

/// A low level deserialization error.
///
/// This type of error is returned when deserialization
/// of some primitive value fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum LowLevelDeserializationError {
    #[error(transparent)]
    IoError(Arc<std::io::Error>),
    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),
    #[error("Failed to convert slice into array: {0}")]
    TryFromSliceError(#[from] std::array::TryFromSliceError),
    #[error("Not enough bytes! expected: {expected}, received: {received}")]
    TooFewBytesReceived { expected: usize, received: usize },
    #[error("Invalid value length: {0}")]
    InvalidValueLength(i32),
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(#[from] TryFromPrimitiveError<u16>),
    #[error("Invalid inet bytes length: {0}. Accepted lengths are 4 and 16 bytes.")]
    InvalidInetLength(u8),
    #[error("UTF8 deserialization failed: {0}")]
    UTF8DeserializationError(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for LowLevelDeserializationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

//! CQL requests sent by the client.

pub mod auth_response;
pub mod batch;
pub mod execute;
pub mod options;
pub mod prepare;
pub mod query;
pub mod register;
pub mod startup;

use std::num::TryFromIntError;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

pub use auth_response::AuthResponse;
pub use batch::Batch;
pub use execute::Execute;
pub use options::Options;
pub use prepare::Prepare;
pub use query::Query;
pub use register::Register;
pub use startup::Startup;

use super::frame_errors::LowLevelDeserializationError;
use super::protocol_version::ProtocolVersion;
use super::types::SerialConsistency;
use super::TryFromPrimitiveError;
use crate::Consistency;

/// Possible requests sent by the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CqlRequestKind {
    Startup,
    AuthResponse,
    Options,
    Query,
    Prepare,
    Execute,
    Batch,
    Register,
}

impl std::fmt::Display for CqlRequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind_str = match self {
            CqlRequestKind::Startup => "STARTUP",
            CqlRequestKind::AuthResponse => "AUTH_RESPONSE",
            CqlRequestKind::Options => "OPTIONS",
            CqlRequestKind::Query => "QUERY",
            CqlRequestKind::Prepare => "PREPARE",
            CqlRequestKind::Execute => "EXECUTE",
            CqlRequestKind::Batch => "BATCH",
            CqlRequestKind::Register => "REGISTER",
        };

        f.write_str(kind_str)
    }
}

/// Opcode of a request, used to identify the request type in a CQL frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestOpcode {
    Startup = 0x01,
    Options = 0x05,
    Query = 0x07,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Batch = 0x0D,
    AuthResponse = 0x0F,
}

impl RequestOpcode {
    pub fn kind(self) -> CqlRequestKind {
        match self {
            RequestOpcode::Startup => CqlRequestKind::Startup,
            RequestOpcode::Options => CqlRequestKind::Options,
            RequestOpcode::Query => CqlRequestKind::Query,
            RequestOpcode::Prepare => CqlRequestKind::Prepare,
            RequestOpcode::Execute => CqlRequestKind::Execute,
            RequestOpcode::Register => CqlRequestKind::Register,
            RequestOpcode::Batch => CqlRequestKind::Batch,
            RequestOpcode::AuthResponse => CqlRequestKind::AuthResponse,
        }
    }
}

impl TryFrom<u8> for RequestOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Startup),
            0x05 => Ok(Self::Options),
            0x07 => Ok(Self::Query),
            0x09 => Ok(Self::Prepare),
            0x0A => Ok(Self::Execute),
            0x0B => Ok(Self::Register),
            0x0D => Ok(Self::Batch),
            0x0F => Ok(Self::AuthResponse),
            _ => Err(TryFromPrimitiveError {
                enum_name: "RequestOpcode",
                primitive: value,
            }),
        }
    }
}

/// An error that occurred while serializing a request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlRequestSerializationError {
    /// A length or count in the request does not fit its wire representation.
    #[error("Failed to serialize field `{field}` of {kind} request: {err}")]
    FieldTooLarge {
        kind: CqlRequestKind,
        field: &'static str,
        err: TryFromIntError,
    },

    /// The request uses a feature the negotiated protocol version lacks.
    #[error("{feature} is not supported by protocol {version}")]
    UnsupportedInVersion {
        feature: &'static str,
        version: ProtocolVersion,
    },

    /// Protocol v5 requires the result metadata id when executing.
    #[error("EXECUTE in protocol v5 requires the result metadata id of the statement")]
    MissingResultMetadataId,

    #[error(transparent)]
    BatchSerialization(#[from] batch::BatchSerializationError),

    /// The serialized body does not fit a frame.
    #[error("Request body of {0} bytes is too large")]
    RequestTooLarge(usize),

    #[error("Snap compression error: {0}")]
    SnapCompressError(Arc<snap::Error>),
}

/// Builds the closure mapping an integer conversion failure to
/// [`CqlRequestSerializationError::FieldTooLarge`].
pub(crate) fn field_too_large(
    kind: CqlRequestKind,
    field: &'static str,
) -> impl FnOnce(TryFromIntError) -> CqlRequestSerializationError {
    move |err| CqlRequestSerializationError::FieldTooLarge { kind, field, err }
}

/// Requests that can be serialized into a CQL frame.
pub trait SerializableRequest {
    const OPCODE: RequestOpcode;

    /// Serializes the request body into the provided buffer,
    /// following the layout of `version`.
    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError>;

    fn to_bytes(&self, version: ProtocolVersion) -> Result<Bytes, CqlRequestSerializationError> {
        let mut v = Vec::new();
        self.serialize(version, &mut v)?;
        Ok(v.into())
    }
}

/// Requests that can be deserialized from a CQL frame.
///
/// The driver never reads requests; this is used by test doubles
/// to assert on what was sent.
pub trait DeserializableRequest: SerializableRequest + Sized {
    fn deserialize(
        buf: &mut &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError>;
}

/// An error type returned by [`DeserializableRequest::deserialize`].
#[derive(Debug, Error)]
pub enum RequestDeserializationError {
    #[error("Low level deser error: {0}")]
    LowLevelDeserialization(#[from] LowLevelDeserializationError),
    #[error("Io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Specified flags are not recognised: {:02x}", flags)]
    UnknownFlags { flags: u32 },
    #[error("Named values in frame are currently unsupported")]
    NamedValuesUnsupported,
    #[error("Expected SerialConsistency, got regular Consistency: {0}")]
    ExpectedSerialConsistency(Consistency),
    #[error("Bad batch type: {0}")]
    UnknownBatchType(u8),
    #[error("Unexpected batch statement kind: {0}")]
    UnexpectedBatchStatementKind(u8),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Any request, as read by a server-side consumer.
#[derive(Debug, PartialEq, Eq)]
pub enum Request<'r> {
    Startup(Startup<'r>),
    AuthResponse(AuthResponse),
    Options(Options),
    Query(Query<'r>),
    Prepare(Prepare<'r>),
    Execute(Execute<'r>),
    Batch(Batch<'r>),
    Register(Register),
}

impl Request<'_> {
    pub fn deserialize(
        buf: &mut &[u8],
        opcode: RequestOpcode,
        version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        match opcode {
            RequestOpcode::Startup => Startup::deserialize(buf, version).map(Self::Startup),
            RequestOpcode::AuthResponse => {
                AuthResponse::deserialize(buf, version).map(Self::AuthResponse)
            }
            RequestOpcode::Options => Options::deserialize(buf, version).map(Self::Options),
            RequestOpcode::Query => Query::deserialize(buf, version).map(Self::Query),
            RequestOpcode::Prepare => Prepare::deserialize(buf, version).map(Self::Prepare),
            RequestOpcode::Execute => Execute::deserialize(buf, version).map(Self::Execute),
            RequestOpcode::Batch => Batch::deserialize(buf, version).map(Self::Batch),
            RequestOpcode::Register => Register::deserialize(buf, version).map(Self::Register),
        }
    }

    /// Retrieves consistency from request frame, if present.
    pub fn get_consistency(&self) -> Option<Consistency> {
        match self {
            Request::Query(q) => Some(q.parameters.consistency),
            Request::Execute(e) => Some(e.parameters.consistency),
            Request::Batch(b) => Some(b.consistency),
            _ => None,
        }
    }

    /// Retrieves serial consistency from request frame.
    pub fn get_serial_consistency(&self) -> Option<Option<SerialConsistency>> {
        match self {
            Request::Query(q) => Some(q.parameters.serial_consistency),
            Request::Execute(e) => Some(e.parameters.serial_consistency),
            Request::Batch(b) => Some(b.serial_consistency),
            _ => None,
        }
    }
}

/// Writes query, batch or prepare flags: `[int]` in v5, `[byte]` before.
pub(crate) fn write_flags(flags: u32, version: ProtocolVersion, buf: &mut Vec<u8>) {
    if version.has_int_flags() {
        super::types::write_int(flags as i32, buf);
    } else {
        buf.push(flags as u8);
    }
}

pub(crate) fn read_flags(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<u32, RequestDeserializationError> {
    if version.has_int_flags() {
        Ok(super::types::read_int(buf)? as u32)
    } else {
        Ok(super::types::read_byte(buf)? as u32)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::*;
    use crate::frame::request::batch::{BatchStatement, BatchType};
    use crate::frame::request::query::QueryParameters;
    use crate::frame::response::result::ColumnType;
    use crate::frame::types;
    use crate::serialize::values::SerializedValues;
    use crate::value::CqlValue;

    fn int_values(ints: &[i32]) -> SerializedValues {
        let mut vals = SerializedValues::new();
        for i in ints {
            vals.add_typed(
                Some(&CqlValue::Int(*i)),
                &ColumnType::Int,
                ProtocolVersion::V4,
            )
            .unwrap();
        }
        vals
    }

    #[test]
    fn request_ser_de_identity() {
        for version in [ProtocolVersion::V3, ProtocolVersion::V4, ProtocolVersion::V5] {
            let query = Query {
                contents: Cow::Borrowed("SELECT host_id from system.peers"),
                parameters: QueryParameters {
                    consistency: Consistency::All,
                    serial_consistency: Some(SerialConsistency::Serial),
                    timestamp: None,
                    page_size: Some(323),
                    paging_state: Some(Bytes::from_static(&[2, 1, 3, 7])),
                    skip_metadata: false,
                    values: Cow::Owned(int_values(&[2137])),
                },
            };
            let mut buf = Vec::new();
            query.serialize(version, &mut buf).unwrap();
            assert_eq!(Query::deserialize(&mut &buf[..], version).unwrap(), query);

            let execute = Execute {
                id: vec![2, 4, 5, 2, 6, 7, 3, 1].into(),
                result_metadata_id: (version == ProtocolVersion::V5)
                    .then(|| Bytes::from_static(&[9, 9])),
                parameters: QueryParameters {
                    consistency: Consistency::Any,
                    timestamp: Some(3423434),
                    skip_metadata: true,
                    values: Cow::Owned(int_values(&[42, 2137])),
                    ..Default::default()
                },
            };
            let mut buf = Vec::new();
            execute.serialize(version, &mut buf).unwrap();
            assert_eq!(Execute::deserialize(&mut &buf[..], version).unwrap(), execute);

            let batch = Batch {
                statements: Cow::Owned(vec![
                    BatchStatement::Query {
                        text: query.contents.clone(),
                    },
                    BatchStatement::Prepared {
                        id: Cow::Borrowed(&execute.id),
                    },
                ]),
                batch_type: BatchType::Logged,
                consistency: Consistency::EachQuorum,
                serial_consistency: Some(SerialConsistency::LocalSerial),
                timestamp: Some(32432),
                values: vec![int_values(&[1]), int_values(&[2])],
            };
            let mut buf = Vec::new();
            batch.serialize(version, &mut buf).unwrap();
            assert_eq!(Batch::deserialize(&mut &buf[..], version).unwrap(), batch);
        }
    }

    #[test]
    fn query_flags_width_depends_on_version() {
        let query = Query {
            contents: Cow::Borrowed("SELECT 1"),
            parameters: QueryParameters {
                page_size: Some(10),
                ..Default::default()
            },
        };
        let v4 = query.to_bytes(ProtocolVersion::V4).unwrap();
        let v5 = query.to_bytes(ProtocolVersion::V5).unwrap();
        assert_eq!(v5.len(), v4.len() + 3);

        // long string (4 + 8) and consistency (2) precede the flags
        assert_eq!(v4[14], 0x04);
        assert_eq!(&v5[14..18], &[0, 0, 0, 0x04]);
    }

    #[test]
    fn v2_rejects_default_timestamp() {
        let query = Query {
            contents: Cow::Borrowed("INSERT INTO t (a) VALUES (1)"),
            parameters: QueryParameters {
                timestamp: Some(1),
                ..Default::default()
            },
        };
        assert_matches!(
            query.to_bytes(ProtocolVersion::V2),
            Err(CqlRequestSerializationError::UnsupportedInVersion { .. })
        );
    }

    #[test]
    fn deser_rejects_unknown_flags() {
        let contents = Cow::Borrowed("SELECT host_id from system.peers");
        let query = Query {
            contents: contents.clone(),
            parameters: QueryParameters {
                serial_consistency: Some(SerialConsistency::LocalSerial),
                ..Default::default()
            },
        };

        let mut buf = Vec::new();
        query.serialize(ProtocolVersion::V4, &mut buf).unwrap();

        let mut buf_ptr = buf.as_slice();
        let serialised_contents = types::read_long_string(&mut buf_ptr).unwrap();
        assert_eq!(serialised_contents, contents);
        let consistency = types::read_consistency(&mut buf_ptr).unwrap();
        assert_eq!(consistency, Consistency::default());

        let flags_idx = buf.len() - buf_ptr.len();
        buf[flags_idx] |= 0x80;

        // Unknown flags may be protocol extensions changing the semantics.
        assert_matches!(
            Query::deserialize(&mut &buf[..], ProtocolVersion::V4),
            Err(RequestDeserializationError::UnknownFlags { flags: 0x80 })
        );
    }

    #[test]
    fn generic_request_dispatch() {
        let prepare = Prepare {
            query: Cow::Borrowed("SELECT * FROM ks.t WHERE a = ?"),
        };
        let buf = prepare.to_bytes(ProtocolVersion::V5).unwrap();
        let request =
            Request::deserialize(&mut &buf[..], RequestOpcode::Prepare, ProtocolVersion::V5)
                .unwrap();
        assert_eq!(request, Request::Prepare(prepare));
        assert_eq!(request.get_consistency(), None);
    }
}

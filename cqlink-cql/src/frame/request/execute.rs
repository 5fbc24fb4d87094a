//! CQL protocol-level representation of an `EXECUTE` request.

use bytes::Bytes;

use super::query::QueryParameters;
use super::{
    field_too_large, CqlRequestKind, CqlRequestSerializationError, DeserializableRequest,
    RequestDeserializationError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;

/// CQL protocol-level representation of an `EXECUTE` request,
/// used to execute a single prepared statement.
#[derive(Debug, PartialEq, Eq)]
pub struct Execute<'a> {
    /// ID of the prepared statement to execute.
    pub id: Bytes,

    /// Result metadata id returned by PREPARE. Sent in protocol v5 only,
    /// where the server uses it to detect stale result metadata.
    pub result_metadata_id: Option<Bytes>,

    /// Various parameters controlling the execution of the statement.
    pub parameters: QueryParameters<'a>,
}

impl SerializableRequest for Execute<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Execute;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        types::write_short_bytes(&self.id[..], buf)
            .map_err(field_too_large(CqlRequestKind::Execute, "statement id"))?;

        if version.has_result_metadata_id() {
            let result_metadata_id = self
                .result_metadata_id
                .as_ref()
                .ok_or(CqlRequestSerializationError::MissingResultMetadataId)?;
            types::write_short_bytes(&result_metadata_id[..], buf)
                .map_err(field_too_large(CqlRequestKind::Execute, "result metadata id"))?;
        }

        self.parameters
            .serialize(CqlRequestKind::Execute, version, buf)
    }
}

impl DeserializableRequest for Execute<'_> {
    fn deserialize(
        buf: &mut &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        let id = Bytes::copy_from_slice(types::read_short_bytes(buf)?);
        let result_metadata_id = if version.has_result_metadata_id() {
            Some(Bytes::copy_from_slice(types::read_short_bytes(buf)?))
        } else {
            None
        };
        let parameters = QueryParameters::deserialize(buf, version)?;

        Ok(Self {
            id,
            result_metadata_id,
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn v5_requires_result_metadata_id() {
        let execute = Execute {
            id: Bytes::from_static(b"id"),
            result_metadata_id: None,
            parameters: QueryParameters::default(),
        };
        assert!(execute.to_bytes(ProtocolVersion::V4).is_ok());
        assert_matches!(
            execute.to_bytes(ProtocolVersion::V5),
            Err(CqlRequestSerializationError::MissingResultMetadataId)
        );
    }
}

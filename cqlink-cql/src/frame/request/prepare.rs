//! CQL protocol-level representation of a `PREPARE` request.

use std::borrow::Cow;

use super::{
    field_too_large, read_flags, write_flags, CqlRequestKind, CqlRequestSerializationError,
    DeserializableRequest, RequestDeserializationError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;

/// CQL protocol-level representation of a `PREPARE` request,
/// used to prepare a single statement for further execution.
#[derive(Debug, PartialEq, Eq)]
pub struct Prepare<'a> {
    /// CQL statement string to prepare.
    pub query: Cow<'a, str>,
}

impl SerializableRequest for Prepare<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Prepare;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.query, buf)
            .map_err(field_too_large(CqlRequestKind::Prepare, "statement"))?;
        // v5 adds prepare flags; no keyspace is ever sent with them.
        if version.has_int_flags() {
            write_flags(0, version, buf);
        }
        Ok(())
    }
}

impl DeserializableRequest for Prepare<'_> {
    fn deserialize(
        buf: &mut &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        let query = Cow::Owned(types::read_long_string(buf)?.to_owned());
        if version.has_int_flags() {
            let flags = read_flags(buf, version)?;
            if flags != 0 {
                return Err(RequestDeserializationError::UnknownFlags { flags });
            }
        }
        Ok(Self { query })
    }
}

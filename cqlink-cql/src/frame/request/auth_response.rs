//! CQL protocol-level representation of an `AUTH_RESPONSE` request.

use super::{
    field_too_large, CqlRequestKind, CqlRequestSerializationError, DeserializableRequest,
    RequestDeserializationError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;

/// Answers an AUTHENTICATE or AUTH_CHALLENGE message with a SASL token.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthResponse {
    pub response: Option<Vec<u8>>,
}

impl SerializableRequest for AuthResponse {
    const OPCODE: RequestOpcode = RequestOpcode::AuthResponse;

    fn serialize(
        &self,
        _version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        types::write_bytes_opt(self.response.as_ref(), buf)
            .map_err(field_too_large(CqlRequestKind::AuthResponse, "response"))
    }
}

impl DeserializableRequest for AuthResponse {
    fn deserialize(
        buf: &mut &[u8],
        _version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        let response = types::read_bytes_opt(buf)?.map(<[u8]>::to_vec);
        Ok(Self { response })
    }
}

//! CQL protocol-level representation of a `REGISTER` request.

use super::{
    field_too_large, CqlRequestKind, CqlRequestSerializationError, DeserializableRequest,
    RequestDeserializationError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::server_event_type::EventType;
use crate::frame::types;

/// Subscribes the connection to server pushed events.
#[derive(Debug, PartialEq, Eq)]
pub struct Register {
    pub event_types_to_register_for: Vec<EventType>,
}

impl SerializableRequest for Register {
    const OPCODE: RequestOpcode = RequestOpcode::Register;

    fn serialize(
        &self,
        _version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        let event_types_list = self
            .event_types_to_register_for
            .iter()
            .map(|event| event.as_str())
            .collect::<Vec<_>>();

        types::write_string_list(&event_types_list, buf)
            .map_err(field_too_large(CqlRequestKind::Register, "event types"))?;
        Ok(())
    }
}

impl DeserializableRequest for Register {
    fn deserialize(
        buf: &mut &[u8],
        _version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        let event_types_to_register_for = types::read_string_list(buf)?
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| RequestDeserializationError::UnknownEventType(s.clone()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            event_types_to_register_for,
        })
    }
}

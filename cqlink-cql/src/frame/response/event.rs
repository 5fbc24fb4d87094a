//! CQL protocol-level representation of an `EVENT` response.

use crate::frame::frame_errors::{
    ClusterChangeEventParseError, CqlEventParseError, SchemaChangeEventParseError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::server_event_type::EventType;
use crate::frame::types;
use std::net::SocketAddr;

/// Event that the server notified the client about.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(clippy::enum_variant_names)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
    MovedNode(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

/// A schema element was created, updated or dropped. Sent both as an event
/// and as the result of a schema altering statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeEvent {
    pub change_type: SchemaChangeType,
    /// Keyspace which is or contains the changed element.
    pub keyspace: String,
    pub target: SchemaChangeTarget,
}

/// Element of a keyspace affected by a schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    /// The keyspace itself.
    Keyspace,
    Table(String),
    Type(String),
    Function { name: String, arguments: Vec<String> },
    Aggregate { name: String, arguments: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

impl Event {
    pub fn deserialize(buf: &mut &[u8], version: ProtocolVersion) -> Result<Self, CqlEventParseError> {
        let event_type: EventType = types::read_string(buf)
            .map_err(CqlEventParseError::EventTypeParseError)?
            .parse()?;
        match event_type {
            EventType::TopologyChange => Ok(Self::TopologyChange(
                TopologyChangeEvent::deserialize(buf)
                    .map_err(CqlEventParseError::TopologyChangeEventParseError)?,
            )),
            EventType::StatusChange => Ok(Self::StatusChange(
                StatusChangeEvent::deserialize(buf)
                    .map_err(CqlEventParseError::StatusChangeEventParseError)?,
            )),
            EventType::SchemaChange => Ok(Self::SchemaChange(SchemaChangeEvent::deserialize(
                buf, version,
            )?)),
        }
    }
}

impl SchemaChangeEvent {
    pub fn deserialize(
        buf: &mut &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, SchemaChangeEventParseError> {
        let change_type =
            types::read_string(buf).map_err(SchemaChangeEventParseError::TypeOfChangeParseError)?;
        let change_type = match change_type {
            "CREATED" => SchemaChangeType::Created,
            "UPDATED" => SchemaChangeType::Updated,
            "DROPPED" => SchemaChangeType::Dropped,
            other => {
                return Err(SchemaChangeEventParseError::UnknownTypeOfChange(
                    other.to_owned(),
                ))
            }
        };

        let read_name = |buf: &mut &[u8]| {
            types::read_string(buf)
                .map(str::to_owned)
                .map_err(SchemaChangeEventParseError::AffectedTargetNameParseError)
        };

        // v2 carries only a keyspace and a table name, empty for keyspace changes.
        if version == ProtocolVersion::V2 {
            let keyspace = types::read_string(buf)
                .map_err(SchemaChangeEventParseError::AffectedKeyspaceParseError)?
                .to_owned();
            let table = read_name(buf)?;
            let target = if table.is_empty() {
                SchemaChangeTarget::Keyspace
            } else {
                SchemaChangeTarget::Table(table)
            };
            return Ok(Self {
                change_type,
                keyspace,
                target,
            });
        }

        let target =
            types::read_string(buf).map_err(SchemaChangeEventParseError::TargetTypeParseError)?;
        let keyspace = types::read_string(buf)
            .map_err(SchemaChangeEventParseError::AffectedKeyspaceParseError)?
            .to_owned();

        let target = match target {
            "KEYSPACE" => SchemaChangeTarget::Keyspace,
            "TABLE" => SchemaChangeTarget::Table(read_name(buf)?),
            "TYPE" => SchemaChangeTarget::Type(read_name(buf)?),
            "FUNCTION" | "AGGREGATE" => {
                let name = read_name(buf)?;
                let arguments = types::read_string_list(buf)
                    .map_err(SchemaChangeEventParseError::ArgumentsParseError)?;
                if target == "FUNCTION" {
                    SchemaChangeTarget::Function { name, arguments }
                } else {
                    SchemaChangeTarget::Aggregate { name, arguments }
                }
            }
            other => {
                return Err(SchemaChangeEventParseError::UnknownTargetOfSchemaChange(
                    other.to_owned(),
                ))
            }
        };

        Ok(Self {
            change_type,
            keyspace,
            target,
        })
    }

    /// Name of the changed element, `None` for keyspace changes.
    pub fn object_name(&self) -> Option<&str> {
        match &self.target {
            SchemaChangeTarget::Keyspace => None,
            SchemaChangeTarget::Table(name) | SchemaChangeTarget::Type(name) => Some(name),
            SchemaChangeTarget::Function { name, .. }
            | SchemaChangeTarget::Aggregate { name, .. } => Some(name),
        }
    }
}

impl TopologyChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ClusterChangeEventParseError> {
        let type_of_change = types::read_string(buf)
            .map_err(ClusterChangeEventParseError::TypeOfChangeParseError)?;
        let addr =
            types::read_inet(buf).map_err(ClusterChangeEventParseError::NodeAddressParseError)?;

        match type_of_change {
            "NEW_NODE" => Ok(Self::NewNode(addr)),
            "REMOVED_NODE" => Ok(Self::RemovedNode(addr)),
            "MOVED_NODE" => Ok(Self::MovedNode(addr)),
            _ => Err(ClusterChangeEventParseError::UnknownTypeOfChange(
                type_of_change.to_string(),
            )),
        }
    }

    pub fn address(&self) -> SocketAddr {
        match self {
            Self::NewNode(addr) | Self::RemovedNode(addr) | Self::MovedNode(addr) => *addr,
        }
    }
}

impl StatusChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ClusterChangeEventParseError> {
        let type_of_change = types::read_string(buf)
            .map_err(ClusterChangeEventParseError::TypeOfChangeParseError)?;
        let addr =
            types::read_inet(buf).map_err(ClusterChangeEventParseError::NodeAddressParseError)?;

        match type_of_change {
            "UP" => Ok(Self::Up(addr)),
            "DOWN" => Ok(Self::Down(addr)),
            _ => Err(ClusterChangeEventParseError::UnknownTypeOfChange(
                type_of_change.to_string(),
            )),
        }
    }

    pub fn address(&self) -> SocketAddr {
        match self {
            Self::Up(addr) | Self::Down(addr) => *addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn function_schema_change() {
        let mut buf = Vec::new();
        types::write_string("SCHEMA_CHANGE", &mut buf).unwrap();
        types::write_string("CREATED", &mut buf).unwrap();
        types::write_string("FUNCTION", &mut buf).unwrap();
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("plus", &mut buf).unwrap();
        types::write_string_list(&["int", "int"], &mut buf).unwrap();

        let event = Event::deserialize(&mut &buf[..], ProtocolVersion::V4).unwrap();
        let Event::SchemaChange(change) = event else {
            panic!("expected a schema change");
        };
        assert_eq!(change.change_type, SchemaChangeType::Created);
        assert_eq!(change.keyspace, "ks");
        assert_eq!(change.object_name(), Some("plus"));
        assert_eq!(
            change.target,
            SchemaChangeTarget::Function {
                name: "plus".to_owned(),
                arguments: vec!["int".to_owned(), "int".to_owned()],
            }
        );
    }

    #[test]
    fn v2_schema_change_layout() {
        let mut buf = Vec::new();
        types::write_string("DROPPED", &mut buf).unwrap();
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("", &mut buf).unwrap();
        let change = SchemaChangeEvent::deserialize(&mut &buf[..], ProtocolVersion::V2).unwrap();
        assert_eq!(change.target, SchemaChangeTarget::Keyspace);

        let mut buf = Vec::new();
        types::write_string("UPDATED", &mut buf).unwrap();
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("tbl", &mut buf).unwrap();
        let change = SchemaChangeEvent::deserialize(&mut &buf[..], ProtocolVersion::V2).unwrap();
        assert_eq!(change.target, SchemaChangeTarget::Table("tbl".to_owned()));
    }

    #[test]
    fn status_and_topology_changes() {
        let addr: SocketAddr = "10.1.2.3:9042".parse().unwrap();
        let mut buf = Vec::new();
        types::write_string("STATUS_CHANGE", &mut buf).unwrap();
        types::write_string("DOWN", &mut buf).unwrap();
        types::write_inet(addr, &mut buf);
        assert_eq!(
            Event::deserialize(&mut &buf[..], ProtocolVersion::V4).unwrap(),
            Event::StatusChange(StatusChangeEvent::Down(addr))
        );

        let mut buf = Vec::new();
        types::write_string("TOPOLOGY_CHANGE", &mut buf).unwrap();
        types::write_string("LEFT_FOR_LUNCH", &mut buf).unwrap();
        types::write_inet(addr, &mut buf);
        assert_matches!(
            Event::deserialize(&mut &buf[..], ProtocolVersion::V4),
            Err(CqlEventParseError::TopologyChangeEventParseError(
                ClusterChangeEventParseError::UnknownTypeOfChange(_)
            ))
        );
    }

    #[test]
    fn unknown_event_type() {
        let mut buf = Vec::new();
        types::write_string("WEATHER_CHANGE", &mut buf).unwrap();
        assert_matches!(
            Event::deserialize(&mut &buf[..], ProtocolVersion::V4),
            Err(CqlEventParseError::UnknownEventType(t)) if t == "WEATHER_CHANGE"
        );
    }
}

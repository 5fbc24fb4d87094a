//! CQL protocol-level representation of a `BATCH` request.

use std::borrow::Cow;

use thiserror::Error;

use super::{
    field_too_large, read_flags, write_flags, CqlRequestKind, CqlRequestSerializationError,
    DeserializableRequest, RequestDeserializationError,
};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types::{self, SerialConsistency};
use crate::serialize::values::SerializedValues;

// Batch flags
const FLAG_WITH_SERIAL_CONSISTENCY: u32 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u32 = 0x20;
const ALL_FLAGS: u32 = FLAG_WITH_SERIAL_CONSISTENCY | FLAG_WITH_DEFAULT_TIMESTAMP;

/// CQL protocol-level representation of a `BATCH` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<'b> {
    pub statements: Cow<'b, [BatchStatement<'b>]>,
    pub batch_type: BatchType,
    pub consistency: types::Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub timestamp: Option<i64>,
    /// One value list per statement, in the order of `statements`.
    pub values: Vec<SerializedValues>,
}

/// The type of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchType {
    #[default]
    Logged = 0,
    Unlogged = 1,
    Counter = 2,
}

impl TryFrom<u8> for BatchType {
    type Error = RequestDeserializationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Logged),
            1 => Ok(Self::Unlogged),
            2 => Ok(Self::Counter),
            _ => Err(RequestDeserializationError::UnknownBatchType(value)),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum BatchStatement<'a> {
    Query { text: Cow<'a, str> },
    Prepared { id: Cow<'a, [u8]> },
}

/// An error that occurred while serializing a batch.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BatchSerializationError {
    #[error("Batch contains {0} statements, more than {max} allowed", max = u16::MAX)]
    TooManyStatements(usize),

    #[error(
        "Length of provided values must be equal to number of batch statements \
        (got {n_value_lists} values, {n_statements} statements)"
    )]
    ValuesAndStatementsLengthMismatch {
        n_value_lists: usize,
        n_statements: usize,
    },
}

impl SerializableRequest for Batch<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Batch;

    fn serialize(
        &self,
        version: ProtocolVersion,
        buf: &mut Vec<u8>,
    ) -> Result<(), CqlRequestSerializationError> {
        buf.push(self.batch_type as u8);

        let n_statements: u16 = self
            .statements
            .len()
            .try_into()
            .map_err(|_| BatchSerializationError::TooManyStatements(self.statements.len()))?;
        if self.values.len() != self.statements.len() {
            return Err(BatchSerializationError::ValuesAndStatementsLengthMismatch {
                n_value_lists: self.values.len(),
                n_statements: self.statements.len(),
            }
            .into());
        }
        types::write_short(n_statements, buf);

        for (statement, values) in self.statements.iter().zip(self.values.iter()) {
            statement.serialize(buf)?;
            values.write_to_request(buf);
        }

        types::write_consistency(self.consistency, buf);

        // Flags, serial consistency and timestamp exist since v3.
        if version == ProtocolVersion::V2 {
            if self.serial_consistency.is_some() || self.timestamp.is_some() {
                return Err(CqlRequestSerializationError::UnsupportedInVersion {
                    feature: "Batch serial consistency and default timestamp",
                    version,
                });
            }
            return Ok(());
        }

        let mut flags = 0;
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }

        write_flags(flags, version, buf);

        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }
}

impl BatchStatement<'_> {
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        match self {
            Self::Query { text } => {
                buf.push(0);
                types::write_long_string(text, buf)
                    .map_err(field_too_large(CqlRequestKind::Batch, "statement"))?;
            }
            Self::Prepared { id } => {
                buf.push(1);
                types::write_short_bytes(id, buf)
                    .map_err(field_too_large(CqlRequestKind::Batch, "statement id"))?;
            }
        }

        Ok(())
    }

    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let kind = types::read_byte(buf)?;
        match kind {
            0 => {
                let text = Cow::Owned(types::read_long_string(buf)?.to_owned());
                Ok(BatchStatement::Query { text })
            }
            1 => {
                let id = types::read_short_bytes(buf)?.to_vec().into();
                Ok(BatchStatement::Prepared { id })
            }
            _ => Err(RequestDeserializationError::UnexpectedBatchStatementKind(
                kind,
            )),
        }
    }
}

impl DeserializableRequest for Batch<'_> {
    fn deserialize(
        buf: &mut &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, RequestDeserializationError> {
        let batch_type = types::read_byte(buf)?.try_into()?;

        let statements_count = types::read_short(buf)? as usize;
        let mut statements = Vec::with_capacity(statements_count);
        let mut values = Vec::with_capacity(statements_count);
        for _ in 0..statements_count {
            statements.push(BatchStatement::deserialize(buf)?);
            values.push(SerializedValues::new_from_frame(buf)?);
        }

        let consistency = types::read_consistency(buf)?;

        if version == ProtocolVersion::V2 {
            return Ok(Self {
                statements: Cow::Owned(statements),
                batch_type,
                consistency,
                serial_consistency: None,
                timestamp: None,
                values,
            });
        }

        let flags = read_flags(buf, version)?;
        let unknown_flags = flags & (!ALL_FLAGS);
        if unknown_flags != 0 {
            return Err(RequestDeserializationError::UnknownFlags {
                flags: unknown_flags,
            });
        }

        let serial_consistency = if flags & FLAG_WITH_SERIAL_CONSISTENCY != 0 {
            let consistency = types::read_consistency(buf)?;
            Some(
                SerialConsistency::try_from(consistency).map_err(|_| {
                    RequestDeserializationError::ExpectedSerialConsistency(consistency)
                })?,
            )
        } else {
            None
        };
        let timestamp = if flags & FLAG_WITH_DEFAULT_TIMESTAMP != 0 {
            Some(types::read_long(buf)?)
        } else {
            None
        };

        Ok(Self {
            statements: Cow::Owned(statements),
            batch_type,
            consistency,
            serial_consistency,
            timestamp,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn values_must_match_statements() {
        let batch = Batch {
            statements: Cow::Owned(vec![BatchStatement::Query {
                text: Cow::Borrowed("INSERT INTO t (a) VALUES (1)"),
            }]),
            batch_type: BatchType::Unlogged,
            consistency: Default::default(),
            serial_consistency: None,
            timestamp: None,
            values: vec![],
        };
        assert_matches!(
            batch.to_bytes(ProtocolVersion::V4),
            Err(CqlRequestSerializationError::BatchSerialization(
                BatchSerializationError::ValuesAndStatementsLengthMismatch {
                    n_value_lists: 0,
                    n_statements: 1
                }
            ))
        );
    }

    #[test]
    fn v2_batch_has_no_flags() {
        let batch = Batch {
            statements: Cow::Owned(vec![BatchStatement::Prepared {
                id: Cow::Borrowed(&[1, 2]),
            }]),
            batch_type: BatchType::Counter,
            consistency: types::Consistency::One,
            serial_consistency: None,
            timestamp: None,
            values: vec![SerializedValues::new()],
        };
        let v2 = batch.to_bytes(ProtocolVersion::V2).unwrap();
        let v4 = batch.to_bytes(ProtocolVersion::V4).unwrap();
        assert_eq!(v2.len() + 1, v4.len());
        assert_eq!(
            Batch::deserialize(&mut &v2[..], ProtocolVersion::V2).unwrap(),
            batch
        );

        let with_timestamp = Batch {
            timestamp: Some(5),
            ..batch
        };
        assert_matches!(
            with_timestamp.to_bytes(ProtocolVersion::V2),
            Err(CqlRequestSerializationError::UnsupportedInVersion { .. })
        );
    }
}

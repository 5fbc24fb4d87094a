//! Decoding of the ERROR response body into [`DbError`].

use crate::errors::{DbError, FailureReasons, WriteType};
use crate::frame::frame_errors::{CqlErrorParseError, LowLevelDeserializationError};
use crate::frame::protocol_version::ProtocolVersion;
use crate::frame::types;
use crate::Consistency;
use bytes::Bytes;

/// An ERROR response: the decoded error and the server's message, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error: DbError,
    pub reason: String,
}

/// Reads the fields of one error kind, attributing failures to the field.
struct ErrorFields<'a, 'b> {
    db_error: &'static str,
    buf: &'a mut &'b [u8],
}

impl<'a, 'b> ErrorFields<'a, 'b> {
    fn new(db_error: &'static str, buf: &'a mut &'b [u8]) -> Self {
        Self { db_error, buf }
    }

    fn malformed(
        &self,
        field: &'static str,
    ) -> impl FnOnce(LowLevelDeserializationError) -> CqlErrorParseError {
        let db_error = self.db_error;
        move |err| CqlErrorParseError::MalformedErrorField {
            db_error,
            field,
            err,
        }
    }

    fn consistency(&mut self) -> Result<Consistency, CqlErrorParseError> {
        types::read_consistency(self.buf).map_err(self.malformed("CONSISTENCY"))
    }

    fn int(&mut self, field: &'static str) -> Result<i32, CqlErrorParseError> {
        types::read_int(self.buf)
            .map_err(LowLevelDeserializationError::from)
            .map_err(self.malformed(field))
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, CqlErrorParseError> {
        types::read_byte(self.buf)
            .map(|b| b != 0)
            .map_err(LowLevelDeserializationError::from)
            .map_err(self.malformed(field))
    }

    fn string(&mut self, field: &'static str) -> Result<String, CqlErrorParseError> {
        types::read_string(self.buf)
            .map(str::to_owned)
            .map_err(self.malformed(field))
    }

    fn write_type(&mut self) -> Result<WriteType, CqlErrorParseError> {
        types::read_string(self.buf)
            .map(WriteType::from)
            .map_err(self.malformed("WRITE_TYPE"))
    }

    // v4 sends the number of failed replicas, v5 a map of replica to failure code.
    fn failures(&mut self, version: ProtocolVersion) -> Result<FailureReasons, CqlErrorParseError> {
        if version < ProtocolVersion::V5 {
            return self.int("NUM_FAILURES").map(FailureReasons::Count);
        }

        let count = types::read_int_length(self.buf).map_err(self.malformed("REASON_MAP"))?;
        let mut reasons = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let addr = types::read_inetaddr(self.buf).map_err(self.malformed("REASON_MAP"))?;
            let code = types::read_short(self.buf)
                .map_err(LowLevelDeserializationError::from)
                .map_err(self.malformed("REASON_MAP"))?;
            reasons.push((addr, code));
        }
        Ok(FailureReasons::ByReplica(reasons))
    }
}

impl Error {
    pub fn deserialize(
        version: ProtocolVersion,
        buf: &mut &[u8],
    ) -> Result<Self, CqlErrorParseError> {
        let code = types::read_int(buf)
            .map_err(|err| CqlErrorParseError::ErrorCodeParseError(err.into()))?;
        let reason = types::read_string(buf)
            .map_err(CqlErrorParseError::ReasonParseError)?
            .to_owned();

        let error: DbError = match code {
            0x0000 => DbError::ServerError,
            0x000A => DbError::ProtocolError,
            0x0100 => DbError::AuthenticationError,
            0x1000 => {
                let mut f = ErrorFields::new("UNAVAILABLE", buf);
                DbError::Unavailable {
                    consistency: f.consistency()?,
                    required: f.int("REQUIRED")?,
                    alive: f.int("ALIVE")?,
                }
            }
            0x1001 => DbError::Overloaded,
            0x1002 => DbError::IsBootstrapping,
            0x1003 => DbError::TruncateError,
            0x1100 => {
                let mut f = ErrorFields::new("WRITE_TIMEOUT", buf);
                DbError::WriteTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    write_type: f.write_type()?,
                }
            }
            0x1200 => {
                let mut f = ErrorFields::new("READ_TIMEOUT", buf);
                DbError::ReadTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    data_present: f.flag("DATA_PRESENT")?,
                }
            }
            0x1300 => {
                let mut f = ErrorFields::new("READ_FAILURE", buf);
                DbError::ReadFailure {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    failures: f.failures(version)?,
                    data_present: f.flag("DATA_PRESENT")?,
                }
            }
            0x1400 => {
                let mut f = ErrorFields::new("FUNCTION_FAILURE", buf);
                DbError::FunctionFailure {
                    keyspace: f.string("KEYSPACE")?,
                    function: f.string("FUNCTION")?,
                    arg_types: types::read_string_list(f.buf).map_err(f.malformed("ARG_TYPES"))?,
                }
            }
            0x1500 => {
                let mut f = ErrorFields::new("WRITE_FAILURE", buf);
                DbError::WriteFailure {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    failures: f.failures(version)?,
                    write_type: f.write_type()?,
                }
            }
            0x1600 => DbError::CdcWriteFailure,
            0x1700 => {
                let mut f = ErrorFields::new("CAS_WRITE_UNKNOWN", buf);
                DbError::CasWriteUnknown {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                }
            }
            0x2000 => DbError::SyntaxError,
            0x2100 => DbError::Unauthorized,
            0x2200 => DbError::Invalid,
            0x2300 => DbError::ConfigError,
            0x2400 => {
                let mut f = ErrorFields::new("ALREADY_EXISTS", buf);
                DbError::AlreadyExists {
                    keyspace: f.string("KEYSPACE")?,
                    table: f.string("TABLE")?,
                }
            }
            0x2500 => {
                let f = ErrorFields::new("UNPREPARED", buf);
                DbError::Unprepared {
                    statement_id: Bytes::copy_from_slice(
                        types::read_short_bytes(f.buf).map_err(f.malformed("STATEMENT_ID"))?,
                    ),
                }
            }
            _ => DbError::Other(code),
        };

        Ok(Error { error, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::errors::{DbError, FailureReasons, WriteType};
    use crate::frame::frame_errors::CqlErrorParseError;
    use crate::frame::protocol_version::ProtocolVersion;
    use crate::frame::types;
    use crate::Consistency;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use std::net::{IpAddr, Ipv4Addr};

    // Serializes the beginning of an ERROR response - error code and message
    // All custom data depending on the error type is appended after these bytes
    fn make_error_request_bytes(error_code: i32, message: &str) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::new();
        let message_len: u16 = message.len().try_into().unwrap();

        bytes.extend(error_code.to_be_bytes());
        bytes.extend(message_len.to_be_bytes());
        bytes.extend(message.as_bytes());

        bytes
    }

    fn deserialize_v4(bytes: &[u8]) -> Error {
        Error::deserialize(ProtocolVersion::V4, &mut &bytes[..]).unwrap()
    }

    // Tests deserialization of all errors without and additional data
    #[test]
    fn deserialize_simple_errors() {
        let simple_error_mappings: [(i32, DbError); 12] = [
            (0x0000, DbError::ServerError),
            (0x000A, DbError::ProtocolError),
            (0x0100, DbError::AuthenticationError),
            (0x1001, DbError::Overloaded),
            (0x1002, DbError::IsBootstrapping),
            (0x1003, DbError::TruncateError),
            (0x1600, DbError::CdcWriteFailure),
            (0x2000, DbError::SyntaxError),
            (0x2100, DbError::Unauthorized),
            (0x2200, DbError::Invalid),
            (0x2300, DbError::ConfigError),
            (0x1234, DbError::Other(0x1234)),
        ];

        for (error_code, expected_error) in &simple_error_mappings {
            let bytes = make_error_request_bytes(*error_code, "simple message");
            let error = deserialize_v4(&bytes);
            assert_eq!(error.error, *expected_error);
            assert_eq!(error.error.code(), *error_code);
            assert_eq!(error.reason, "simple message");
        }
    }

    #[test]
    fn deserialize_unavailable() {
        let mut bytes = make_error_request_bytes(0x1000, "message 2");
        bytes.extend(1_i16.to_be_bytes());
        bytes.extend(2_i32.to_be_bytes());
        bytes.extend(3_i32.to_be_bytes());

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::Unavailable {
                consistency: Consistency::One,
                required: 2,
                alive: 3,
            }
        );
        assert_eq!(error.reason, "message 2");
    }

    #[test]
    fn deserialize_write_timeout() {
        let mut bytes = make_error_request_bytes(0x1100, "message 2");
        bytes.extend(0x0004_i16.to_be_bytes());
        bytes.extend((-5_i32).to_be_bytes()); // Allow negative values when they don't make sense, it's better than crashing with ProtocolError
        bytes.extend(100_i32.to_be_bytes());
        types::write_string("SIMPLE", &mut bytes).unwrap();

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::WriteTimeout {
                consistency: Consistency::Quorum,
                received: -5,
                required: 100,
                write_type: WriteType::Simple,
            }
        );
        assert_eq!(error.reason, "message 2");
    }

    #[test]
    fn deserialize_read_timeout() {
        let mut bytes = make_error_request_bytes(0x1200, "message 2");
        bytes.extend(0x0002_i16.to_be_bytes());
        bytes.extend(8_i32.to_be_bytes());
        bytes.extend(32_i32.to_be_bytes());
        bytes.push(0_u8);

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::ReadTimeout {
                consistency: Consistency::Two,
                received: 8,
                required: 32,
                data_present: false,
            }
        );
        assert!(error.error.is_timeout());
    }

    #[test]
    fn deserialize_read_failure() {
        let mut bytes = make_error_request_bytes(0x1300, "message 2");
        bytes.extend(0x0003_i16.to_be_bytes());
        bytes.extend(4_i32.to_be_bytes());
        bytes.extend(5_i32.to_be_bytes());
        bytes.extend(6_i32.to_be_bytes());
        bytes.push(123_u8); // Any non-zero value means data_present is true

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::ReadFailure {
                consistency: Consistency::Three,
                received: 4,
                required: 5,
                failures: FailureReasons::Count(6),
                data_present: true,
            }
        );
    }

    #[test]
    fn deserialize_v5_read_failure_reason_map() {
        let mut bytes = make_error_request_bytes(0x1300, "failed");
        bytes.extend(0x0001_i16.to_be_bytes());
        bytes.extend(1_i32.to_be_bytes());
        bytes.extend(2_i32.to_be_bytes());
        bytes.extend(1_i32.to_be_bytes());
        types::write_inetaddr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 3)), &mut bytes);
        bytes.extend(0x0001_u16.to_be_bytes());
        bytes.push(0);

        let error = Error::deserialize(ProtocolVersion::V5, &mut &bytes[..]).unwrap();

        assert_eq!(
            error.error,
            DbError::ReadFailure {
                consistency: Consistency::One,
                received: 1,
                required: 2,
                failures: FailureReasons::ByReplica(vec![(
                    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 3)),
                    0x0001
                )]),
                data_present: false,
            }
        );
    }

    #[test]
    fn deserialize_function_failure() {
        let mut bytes = make_error_request_bytes(0x1400, "message 2");
        types::write_string("keyspace_name", &mut bytes).unwrap();
        types::write_string("function_name", &mut bytes).unwrap();
        types::write_string_list(&["type1", "type2"], &mut bytes).unwrap();

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::FunctionFailure {
                keyspace: "keyspace_name".to_string(),
                function: "function_name".to_string(),
                arg_types: vec!["type1".to_string(), "type2".to_string()]
            }
        );
    }

    #[test]
    fn deserialize_write_failure() {
        let mut bytes = make_error_request_bytes(0x1500, "message 2");
        bytes.extend(0x0000_i16.to_be_bytes());
        bytes.extend(2_i32.to_be_bytes());
        bytes.extend(4_i32.to_be_bytes());
        bytes.extend(8_i32.to_be_bytes());
        types::write_string("COUNTER", &mut bytes).unwrap();

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::WriteFailure {
                consistency: Consistency::Any,
                received: 2,
                required: 4,
                failures: FailureReasons::Count(8),
                write_type: WriteType::Counter,
            }
        );
    }

    #[test]
    fn deserialize_cas_write_unknown() {
        let mut bytes = make_error_request_bytes(0x1700, "cas");
        bytes.extend(0x0009_i16.to_be_bytes());
        bytes.extend(1_i32.to_be_bytes());
        bytes.extend(2_i32.to_be_bytes());

        let error = Error::deserialize(ProtocolVersion::V5, &mut &bytes[..]).unwrap();
        assert_eq!(
            error.error,
            DbError::CasWriteUnknown {
                consistency: Consistency::LocalSerial,
                received: 1,
                required: 2,
            }
        );
    }

    #[test]
    fn deserialize_already_exists() {
        let mut bytes = make_error_request_bytes(0x2400, "already exists");
        types::write_string("test_ks", &mut bytes).unwrap();
        types::write_string("test_tbl", &mut bytes).unwrap();

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::AlreadyExists {
                keyspace: "test_ks".to_string(),
                table: "test_tbl".to_string(),
            }
        );
        assert_eq!(error.error.code(), 0x2400);
        assert_eq!(error.reason, "already exists");
    }

    #[test]
    fn deserialize_unprepared() {
        let mut bytes = make_error_request_bytes(0x2500, "message 3");
        let statement_id = b"deadbeef";
        bytes.extend((statement_id.len() as i16).to_be_bytes());
        bytes.extend(statement_id);

        let error = deserialize_v4(&bytes);

        assert_eq!(
            error.error,
            DbError::Unprepared {
                statement_id: Bytes::from_static(b"deadbeef")
            }
        );
        assert_eq!(error.reason, "message 3");
    }

    #[test]
    fn truncated_payload_names_the_field() {
        let mut bytes = make_error_request_bytes(0x1000, "message");
        bytes.extend(1_i16.to_be_bytes());
        bytes.extend(2_i32.to_be_bytes());

        assert_matches!(
            Error::deserialize(ProtocolVersion::V4, &mut &bytes[..]),
            Err(CqlErrorParseError::MalformedErrorField {
                db_error: "UNAVAILABLE",
                field: "ALIVE",
                ..
            })
        );
    }
}

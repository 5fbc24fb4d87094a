//! Responses sent by the server and their deserialization.

pub mod authenticate;
pub mod cql_to_rust;
pub mod error;
pub mod event;
pub mod result;
pub mod supported;

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::CqlResponseKind;
use crate::frame::frame_errors::CqlResponseParseError;
use crate::frame::protocol_version::ProtocolVersion;
pub use error::Error;
pub use supported::Supported;

use super::TryFromPrimitiveError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResponseOpcode {
    Error = 0x00,
    Ready = 0x02,
    Authenticate = 0x03,
    Supported = 0x06,
    Result = 0x08,
    Event = 0x0C,
    AuthChallenge = 0x0E,
    AuthSuccess = 0x10,
}

impl ResponseOpcode {
    pub fn kind(self) -> CqlResponseKind {
        match self {
            ResponseOpcode::Error => CqlResponseKind::Error,
            ResponseOpcode::Ready => CqlResponseKind::Ready,
            ResponseOpcode::Authenticate => CqlResponseKind::Authenticate,
            ResponseOpcode::Supported => CqlResponseKind::Supported,
            ResponseOpcode::Result => CqlResponseKind::Result,
            ResponseOpcode::Event => CqlResponseKind::Event,
            ResponseOpcode::AuthChallenge => CqlResponseKind::AuthChallenge,
            ResponseOpcode::AuthSuccess => CqlResponseKind::AuthSuccess,
        }
    }
}

impl TryFrom<u8> for ResponseOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, TryFromPrimitiveError<u8>> {
        match value {
            0x00 => Ok(Self::Error),
            0x02 => Ok(Self::Ready),
            0x03 => Ok(Self::Authenticate),
            0x06 => Ok(Self::Supported),
            0x08 => Ok(Self::Result),
            0x0C => Ok(Self::Event),
            0x0E => Ok(Self::AuthChallenge),
            0x10 => Ok(Self::AuthSuccess),
            _ => Err(TryFromPrimitiveError {
                enum_name: "ResponseOpcode",
                primitive: value,
            }),
        }
    }
}

#[derive(Debug)]
pub enum Response {
    Error(Error),
    Ready,
    Result(result::Result),
    Authenticate(authenticate::Authenticate),
    AuthSuccess(authenticate::AuthSuccess),
    AuthChallenge(authenticate::AuthChallenge),
    Supported(Supported),
    Event(event::Event),
}

impl Response {
    pub fn to_response_kind(&self) -> CqlResponseKind {
        match self {
            Response::Error(_) => CqlResponseKind::Error,
            Response::Ready => CqlResponseKind::Ready,
            Response::Result(_) => CqlResponseKind::Result,
            Response::Authenticate(_) => CqlResponseKind::Authenticate,
            Response::AuthSuccess(_) => CqlResponseKind::AuthSuccess,
            Response::AuthChallenge(_) => CqlResponseKind::AuthChallenge,
            Response::Supported(_) => CqlResponseKind::Supported,
            Response::Event(_) => CqlResponseKind::Event,
        }
    }

    /// Deserializes a response body with its extensions already stripped.
    ///
    /// `cached_metadata` is used by RESULT:Rows responses sent without
    /// metadata.
    pub fn deserialize(
        version: ProtocolVersion,
        opcode: ResponseOpcode,
        body: Bytes,
        cached_metadata: Option<&Arc<result::ResultMetadata>>,
    ) -> Result<Response, CqlResponseParseError> {
        let buf = &mut &*body;
        let response = match opcode {
            ResponseOpcode::Error => Response::Error(Error::deserialize(version, buf)?),
            ResponseOpcode::Ready => Response::Ready,
            ResponseOpcode::Authenticate => Response::Authenticate(
                authenticate::Authenticate::deserialize(buf)
                    .map_err(CqlResponseParseError::CqlAuthenticateParseError)?,
            ),
            ResponseOpcode::Supported => Response::Supported(
                Supported::deserialize(buf)
                    .map_err(CqlResponseParseError::CqlSupportedParseError)?,
            ),
            ResponseOpcode::Result => {
                Response::Result(result::deserialize(body.clone(), version, cached_metadata)?)
            }
            ResponseOpcode::Event => Response::Event(event::Event::deserialize(buf, version)?),
            ResponseOpcode::AuthChallenge => Response::AuthChallenge(
                authenticate::AuthChallenge::deserialize(buf)
                    .map_err(CqlResponseParseError::CqlAuthChallengeParseError)?,
            ),
            ResponseOpcode::AuthSuccess => Response::AuthSuccess(
                authenticate::AuthSuccess::deserialize(buf)
                    .map_err(CqlResponseParseError::CqlAuthSuccessParseError)?,
            ),
        };

        Ok(response)
    }

    pub fn into_non_error_response(self) -> Result<NonErrorResponse, Error> {
        Ok(match self {
            Response::Error(err) => return Err(err),
            Response::Ready => NonErrorResponse::Ready,
            Response::Result(res) => NonErrorResponse::Result(res),
            Response::Authenticate(auth) => NonErrorResponse::Authenticate(auth),
            Response::AuthSuccess(auth_succ) => NonErrorResponse::AuthSuccess(auth_succ),
            Response::AuthChallenge(auth_chal) => NonErrorResponse::AuthChallenge(auth_chal),
            Response::Supported(sup) => NonErrorResponse::Supported(sup),
            Response::Event(eve) => NonErrorResponse::Event(eve),
        })
    }
}

// A Response which can not be Response::Error
#[derive(Debug)]
pub enum NonErrorResponse {
    Ready,
    Result(result::Result),
    Authenticate(authenticate::Authenticate),
    AuthSuccess(authenticate::AuthSuccess),
    AuthChallenge(authenticate::AuthChallenge),
    Supported(Supported),
    Event(event::Event),
}

impl NonErrorResponse {
    pub fn to_response_kind(&self) -> CqlResponseKind {
        match self {
            NonErrorResponse::Ready => CqlResponseKind::Ready,
            NonErrorResponse::Result(_) => CqlResponseKind::Result,
            NonErrorResponse::Authenticate(_) => CqlResponseKind::Authenticate,
            NonErrorResponse::AuthSuccess(_) => CqlResponseKind::AuthSuccess,
            NonErrorResponse::AuthChallenge(_) => CqlResponseKind::AuthChallenge,
            NonErrorResponse::Supported(_) => CqlResponseKind::Supported,
            NonErrorResponse::Event(_) => CqlResponseKind::Event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DbError;
    use crate::frame::types;
    use assert_matches::assert_matches;

    #[test]
    fn error_is_split_off() {
        let mut body = Vec::new();
        types::write_int(0x2200, &mut body);
        types::write_string("bad request", &mut body).unwrap();
        let response =
            Response::deserialize(ProtocolVersion::V4, ResponseOpcode::Error, body.into(), None)
                .unwrap();
        assert_eq!(response.to_response_kind(), CqlResponseKind::Error);
        assert_matches!(
            response.into_non_error_response(),
            Err(Error { error: DbError::Invalid, reason }) if reason == "bad request"
        );
    }

    #[test]
    fn malformed_body_names_response_kind() {
        let err = Response::deserialize(
            ProtocolVersion::V4,
            ResponseOpcode::Supported,
            Bytes::from_static(&[0, 1, 0]),
            None,
        )
        .unwrap_err();
        assert_eq!(err.to_response_kind(), CqlResponseKind::Supported);
    }

    #[test]
    fn opcodes() {
        assert_eq!(ResponseOpcode::try_from(0x0C).unwrap(), ResponseOpcode::Event);
        assert!(ResponseOpcode::try_from(0x01).is_err());
        assert_eq!(ResponseOpcode::AuthSuccess.kind(), CqlResponseKind::AuthSuccess);
    }
}

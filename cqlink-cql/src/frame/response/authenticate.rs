//! `AUTHENTICATE`, `AUTH_CHALLENGE` and `AUTH_SUCCESS` responses.

use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::types;

/// The server requires authentication with the named authenticator class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub authenticator_name: String,
}

impl Authenticate {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let authenticator_name = types::read_string(buf)?.to_owned();
        Ok(Authenticate { authenticator_name })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub success_message: Option<Vec<u8>>,
}

impl AuthSuccess {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let success_message = types::read_bytes_opt(buf)?.map(ToOwned::to_owned);
        Ok(AuthSuccess { success_message })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub authenticate_message: Option<Vec<u8>>,
}

impl AuthChallenge {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, LowLevelDeserializationError> {
        let authenticate_message = types::read_bytes_opt(buf)?.map(ToOwned::to_owned);
        Ok(AuthChallenge {
            authenticate_message,
        })
    }
}

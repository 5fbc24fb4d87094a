//! SASL-style authentication exchange run during the connection handshake.
//!
//! When the server answers STARTUP with AUTHENTICATE, the connection asks the
//! configured [`AuthenticatorProvider`] for a session and an initial token, then
//! relays AUTH_CHALLENGE tokens to the session until the server sends
//! AUTH_SUCCESS.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

pub use cqlink_cql::frame::Authenticator;

/// Type to represent an authentication error message.
pub type AuthError = String;

/// One authentication exchange on one connection.
#[async_trait]
pub trait AuthenticatorSession: Send + Sync {
    /// Answers an AUTH_CHALLENGE. The token is authenticator specific and may
    /// be absent or empty.
    async fn evaluate_challenge(
        &mut self,
        token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError>;

    /// Handles the token sent along AUTH_SUCCESS.
    async fn success(&mut self, token: Option<&[u8]>) -> Result<(), AuthError>;
}

/// Factory of [`AuthenticatorSession`]s, one per opened connection.
///
/// Set it with [`ConnectionConfig::authenticator`](crate::network::ConnectionConfig::authenticator).
/// [`PlainTextAuthenticator`] covers username/password authenticators.
#[async_trait]
pub trait AuthenticatorProvider: Sync + Send {
    /// Returns the initial response and the session answering further
    /// challenges. `authenticator_name` is the class name the server announced.
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError>;
}

struct PlainTextAuthenticatorSession;

#[async_trait]
impl AuthenticatorSession for PlainTextAuthenticatorSession {
    async fn evaluate_challenge(
        &mut self,
        _token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        Err("Challenges are not expected during PlainTextAuthentication".to_string())
    }

    async fn success(&mut self, _token: Option<&[u8]>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Sends `\0username\0password` as the initial response.
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    /// Creates new [`PlainTextAuthenticator`] instance with provided username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PlainTextAuthenticator {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthenticatorProvider for PlainTextAuthenticator {
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
        if let Authenticator::Other(name) = Authenticator::from(authenticator_name) {
            tracing::debug!(
                authenticator = name,
                "Sending plain text credentials to an unrecognized authenticator"
            );
        }

        let mut response = BytesMut::with_capacity(2 + self.username.len() + self.password.len());
        response.put_u8(0);
        response.put_slice(self.username.as_bytes());
        response.put_u8(0);
        response.put_slice(self.password.as_bytes());

        Ok((
            Some(response.to_vec()),
            Box::new(PlainTextAuthenticatorSession),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_initial_response() {
        let provider = PlainTextAuthenticator::new("cassandra", "secret");
        let (initial, mut session) = provider
            .start_authentication_session("org.apache.cassandra.auth.PasswordAuthenticator")
            .await
            .unwrap();
        assert_eq!(initial.unwrap(), b"\0cassandra\0secret");

        assert!(session.evaluate_challenge(Some(b"more")).await.is_err());
        session.success(None).await.unwrap();
    }
}

//! Errors returned by the driver.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

pub use cqlink_cql::errors::{
    BadKeyspaceName, BadQuery, CqlResponseKind, DbError, FailureReasons, WriteType,
};
use cqlink_cql::frame::frame_errors::{
    CqlEventParseError, CqlRequestSerializationError, CqlResponseParseError,
    FrameBodyExtensionsParseError, FrameHeaderParseError,
};
use cqlink_cql::frame::request::CqlRequestKind;
use cqlink_cql::frame::response;
use cqlink_cql::serialize::SerializationError;
use thiserror::Error;

use crate::authentication::AuthError;

/// Error that occurred during request execution.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum QueryError {
    /// Database sent a response containing some error with a message
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// Caller passed an invalid request
    #[error(transparent)]
    BadQuery(#[from] BadQuery),

    /// Failed to serialize the request frame.
    #[error("Failed to serialize CQL request: {0}")]
    CqlRequestSerialization(#[from] CqlRequestSerializationError),

    /// Failed to strip compression, tracing id, warnings or custom payload
    /// off the response body.
    #[error(transparent)]
    BodyExtensionsParseError(#[from] FrameBodyExtensionsParseError),

    /// Failed to deserialize the response body.
    #[error(transparent)]
    CqlResponseParseError(#[from] CqlResponseParseError),

    /// The server sent a response of a kind that does not answer the request.
    #[error("Received unexpected response from the server: {0}")]
    UnexpectedResponse(CqlResponseKind),

    /// Re-preparing a statement gave it a different id, which should not happen
    /// as the id is a hash of the statement text.
    #[error(
        "Prepared statement id changed after repreparation; md5 sum (computed from the query string) should stay the same. \
        Statement: \"{statement}\"; expected id: {expected_id:?}; reprepared id: {reprepared_id:?}"
    )]
    RepreparedIdChanged {
        statement: String,
        expected_id: Vec<u8>,
        reprepared_id: Vec<u8>,
    },

    /// The server reported an unprepared statement id that is not part of the batch.
    #[error("Unprepared statement id {0:?} is missing in the batch")]
    RepreparedIdMissingInBatch(Vec<u8>),

    /// `USE` was answered with a different keyspace than requested.
    #[error("Keyspace name mismatch; expected: {expected_keyspace_name_lowercase}, received: {result_keyspace_name_lowercase}")]
    KeyspaceNameMismatch {
        expected_keyspace_name_lowercase: String,
        result_keyspace_name_lowercase: String,
    },

    /// The connection broke; every request in flight on it failed.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// All stream ids of the connection are taken by requests in flight.
    #[error("Unable to allocate stream id")]
    UnableToAllocStreamId,

    /// No response arrived before the request timeout expired.
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),
}

/// Coarse classification of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// The connection is unusable and has to be replaced.
    Connection,
    /// The server executed the request and answered with an error.
    Server,
    /// The request was malformed, or the server broke the protocol.
    Driver,
    /// No answer in time; the request may or may not have been executed.
    Timeout,
}

impl QueryError {
    /// Classifies the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueryError::DbError(..) => ErrorCategory::Server,
            QueryError::BrokenConnection(_) => ErrorCategory::Connection,
            QueryError::RequestTimeout(_) => ErrorCategory::Timeout,
            QueryError::BadQuery(_)
            | QueryError::CqlRequestSerialization(_)
            | QueryError::BodyExtensionsParseError(_)
            | QueryError::CqlResponseParseError(_)
            | QueryError::UnexpectedResponse(_)
            | QueryError::RepreparedIdChanged { .. }
            | QueryError::RepreparedIdMissingInBatch(_)
            | QueryError::KeyspaceNameMismatch { .. }
            | QueryError::UnableToAllocStreamId => ErrorCategory::Driver,
        }
    }
}

impl From<SerializationError> for QueryError {
    fn from(err: SerializationError) -> QueryError {
        QueryError::BadQuery(BadQuery::SerializationError(err))
    }
}

impl From<BadKeyspaceName> for QueryError {
    fn from(keyspace_err: BadKeyspaceName) -> QueryError {
        QueryError::BadQuery(BadQuery::BadKeyspaceName(keyspace_err))
    }
}

impl From<response::Error> for QueryError {
    fn from(error: response::Error) -> QueryError {
        QueryError::DbError(error.error, error.reason)
    }
}

/// Error that occurred while opening a connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Connecting to the node did not finish before the connect timeout.
    #[error("Connect timeout elapsed")]
    ConnectTimeout,

    /// Input/Output error while connecting.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// One of the handshake requests failed.
    #[error(transparent)]
    ConnectionSetupRequestError(#[from] ConnectionSetupRequestError),

    /// The connection broke during the handshake.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// The configured keyspace could not be set.
    #[error("Failed to set the keyspace of the connection: {0}")]
    UseKeyspace(QueryError),
}

impl From<std::io::Error> for ConnectionError {
    fn from(value: std::io::Error) -> Self {
        ConnectionError::IoError(Arc::new(value))
    }
}

impl ConnectionError {
    /// Checks if this error indicates that a chosen source port/address cannot be bound.
    pub fn is_address_unavailable_for_use(&self) -> bool {
        if let ConnectionError::IoError(io_error) = self {
            return matches!(
                io_error.kind(),
                ErrorKind::AddrInUse | ErrorKind::PermissionDenied
            );
        }

        false
    }
}

/// A handshake request failed.
#[derive(Error, Debug, Clone)]
#[error("Failed to perform a connection setup request. Request: {request_kind}, reason: {error}")]
pub struct ConnectionSetupRequestError {
    request_kind: CqlRequestKind,
    error: ConnectionSetupRequestErrorKind,
}

/// Reason of a [`ConnectionSetupRequestError`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionSetupRequestErrorKind {
    /// Sending the request or receiving its response failed.
    #[error(transparent)]
    Request(#[from] QueryError),

    /// The server demanded authentication, but no authenticator is configured.
    #[error("Authentication is required. Set ConnectionConfig::authenticator, e.g. to a PlainTextAuthenticator")]
    MissingAuthentication,

    /// The authenticator refused to start a session.
    #[error("Failed to start client's auth session: {0}")]
    StartAuthSessionError(AuthError),

    /// The authenticator failed to answer a challenge.
    #[error("Failed to evaluate auth challenge on client side: {0}")]
    AuthChallengeEvaluationError(AuthError),

    /// The authenticator rejected the final message of the server.
    #[error("Failed to finish auth challenge on client side: {0}")]
    AuthFinishError(AuthError),
}

impl ConnectionSetupRequestError {
    pub(crate) fn new(
        request_kind: CqlRequestKind,
        error: impl Into<ConnectionSetupRequestErrorKind>,
    ) -> Self {
        ConnectionSetupRequestError {
            request_kind,
            error: error.into(),
        }
    }

    /// The handshake request that failed.
    pub fn request_kind(&self) -> &CqlRequestKind {
        &self.request_kind
    }

    /// Why it failed.
    pub fn error(&self) -> &ConnectionSetupRequestErrorKind {
        &self.error
    }
}

/// The connection got broken; shared by every request that was in flight.
///
/// Holds the reason as a type-erased error, see [`BrokenConnectionErrorKind`]
/// for what the driver itself puts there.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<dyn StdError + Sync + Send>);

impl BrokenConnectionError {
    /// Retrieve an error reason by downcasting to specific type.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

/// Reasons for which the driver breaks a connection.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokenConnectionErrorKind {
    /// Reading a frame off the socket failed.
    #[error("Failed to deserialize frame: {0}")]
    FrameHeaderParseError(FrameHeaderParseError),

    /// A frame on the event stream could not be handled.
    #[error("Failed to handle server event: {0}")]
    CqlEventHandlingError(#[from] CqlEventHandlingError),

    /// The server answered on a stream no request was sent on.
    #[error("Received a server frame with unexpected stream id: {0}")]
    UnexpectedStreamId(i16),

    /// Writing to the socket failed.
    #[error("Failed to write data: {0}")]
    WriteError(std::io::Error),

    /// Too many requests were abandoned and never answered.
    #[error("Too many orphaned stream ids: {0}")]
    TooManyOrphanedStreamIds(u16),

    /// The heartbeat was not answered in time.
    #[error("Timed out after {0:?} while waiting for response to keepalive request")]
    KeepaliveTimeout(Duration),

    /// The heartbeat request failed.
    #[error("Failed to execute keepalive request: {0}")]
    KeepaliveRequestError(Arc<QueryError>),

    /// The router task went away before answering.
    #[error("Failed to send/receive data needed to perform a request via tokio channel.")]
    ChannelError,

    /// [`Connection::close`](crate::network::Connection::close) was called.
    #[error("Connection was closed by the client")]
    ClosedByClient,
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(value))
    }
}

/// Failed to handle a frame received on the event stream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CqlEventHandlingError {
    /// Failed to strip the extensions off the event body.
    #[error("Failed to deserialize EVENT response: {0}")]
    BodyExtensionParseError(#[from] FrameBodyExtensionsParseError),

    /// Failed to deserialize the event.
    #[error("Failed to deserialize EVENT response: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),

    /// The response on the event stream is not an EVENT.
    #[error("Received unexpected server response on stream -1: {0}. Expected EVENT response")]
    UnexpectedResponse(CqlResponseKind),

    /// The response on the event stream is not an EVENT.
    #[error("Failed to deserialize a header of the server response: {0}")]
    ResponseParseError(#[from] CqlResponseParseError),

    /// The receiver of events was dropped.
    #[error("Failed to send event info via channel. The channel is probably closed, which is caused by connection object being dropped.")]
    SendError,
}

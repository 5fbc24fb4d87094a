use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cqlink_cql::frame::protocol_version::ProtocolVersion;
use cqlink_cql::frame::request::{self, execute, options, query, CqlRequestKind, SerializableRequest};
use cqlink_cql::frame::response::authenticate::Authenticate;
use cqlink_cql::frame::response::event::Event;
use cqlink_cql::frame::response::result::{self, ResultMetadata};
use cqlink_cql::frame::response::{NonErrorResponse, Response, ResponseOpcode, Supported};
use cqlink_cql::frame::server_event_type::EventType;
use cqlink_cql::frame::{self, Compression, FrameParams};
use cqlink_cql::serialize::SerializedValues;
use cqlink_cql::value::CqlValue;
use futures::future::RemoteHandle;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::keyspace::{KeyspaceGate, KeyspaceGuard};
use super::prepared_cache::PreparedCache;
use super::router::{spawn_router, ErrorReceiver, ResponseBody, RouterConfig, RouterHandle, TaskResponse};
use super::{ConnectionState, VerifiedKeyspaceName};
use crate::authentication::AuthenticatorProvider;
use crate::errors::{
    BadQuery, ConnectionError, ConnectionSetupRequestError, ConnectionSetupRequestErrorKind,
    DbError, QueryError,
};
use crate::observability::metrics::ConnectionMetrics;
use crate::response::unbuffered::{read_unbuffered, StreamedBody};
use crate::response::{
    NonErrorAuthResponse, NonErrorStartupResponse, QueryResponse, QueryResult, UnbufferedResult,
};
use crate::statement::{
    Batch, BatchStatement, Consistency, PreparedStatement, SerialConsistency, Statement,
    StatementConfig,
};

/// Configuration of a single connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Protocol version spoken on the connection. There is no downgrade:
    /// a node refusing it fails the handshake.
    pub protocol_version: ProtocolVersion,
    /// Compression requested in STARTUP. Falls back to none if the node
    /// does not offer it.
    pub compression: Option<Compression>,
    /// Sets `TCP_NODELAY` on sockets opened by [`open_connection`].
    pub tcp_nodelay: bool,
    /// Idle time before TCP keepalive probes start, `None` disables them.
    pub tcp_keepalive_interval: Option<Duration>,
    /// Bound on the TCP connect of [`open_connection`].
    pub connect_timeout: Duration,
    /// Client side timeout of requests whose statement does not set one.
    pub request_timeout: Option<Duration>,
    /// Consistency of statements which do not set one.
    pub default_consistency: Consistency,
    /// Serial consistency of statements which do not set one.
    pub default_serial_consistency: Option<SerialConsistency>,
    /// Answers AUTHENTICATE during the handshake.
    pub authenticator: Option<Arc<dyn AuthenticatorProvider>>,
    /// If set, the connection registers for all server events and pushes
    /// them here. A full channel stalls the connection.
    pub event_sender: Option<mpsc::Sender<Event>>,
    /// Keyspace the connection switches to at the end of the handshake.
    pub keyspace: Option<VerifiedKeyspaceName>,
    /// Upper bound on requests in flight, further capped by the stream ids
    /// of the protocol version.
    pub max_in_flight: usize,
    /// How many times a statement the node reports as unprepared is
    /// prepared again before the error is returned.
    pub reprepare_attempts: usize,
    /// Period of OPTIONS heartbeats, `None` disables them.
    pub keepalive_interval: Option<Duration>,
    /// A heartbeat unanswered for this long breaks the connection.
    pub keepalive_timeout: Option<Duration>,
    /// Counters to update. Each connection gets its own if unset.
    pub metrics: Option<Arc<ConnectionMetrics>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V4,
            compression: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(30)),
            default_consistency: Consistency::LocalQuorum,
            default_serial_consistency: Some(SerialConsistency::LocalSerial),
            authenticator: None,
            event_sender: None,
            keyspace: None,
            max_in_flight: 2048,
            reprepare_attempts: 1,
            keepalive_interval: None,
            keepalive_timeout: Some(Duration::from_secs(30)),
            metrics: None,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("protocol_version", &self.protocol_version)
            .field("compression", &self.compression)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("tcp_keepalive_interval", &self.tcp_keepalive_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("default_consistency", &self.default_consistency)
            .field("default_serial_consistency", &self.default_serial_consistency)
            .field("authenticator", &self.authenticator.is_some())
            .field("event_sender", &self.event_sender.is_some())
            .field("keyspace", &self.keyspace)
            .field("max_in_flight", &self.max_in_flight)
            .field("reprepare_attempts", &self.reprepare_attempts)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("keepalive_timeout", &self.keepalive_timeout)
            .finish_non_exhaustive()
    }
}

/// A connection to a node, multiplexing concurrent requests over one socket.
///
/// Share it behind an `Arc` to issue requests from many tasks. Dropping it
/// stops its router and fails the requests in flight.
pub struct Connection {
    _worker_handle: RemoteHandle<()>,
    router_handle: Arc<RouterHandle>,
    config: ConnectionConfig,
    // Negotiated in STARTUP.
    compression: Option<Compression>,
    state: Arc<watch::Sender<ConnectionState>>,
    keyspace: KeyspaceGate,
    prepared: PreparedCache,
    metrics: Arc<ConnectionMetrics>,
}

impl Connection {
    /// Runs the handshake over `stream` and returns the ready connection,
    /// together with a receiver of the error that eventually breaks it.
    pub async fn from_stream(
        stream: impl AsyncRead + AsyncWrite + Send + 'static,
        config: ConnectionConfig,
    ) -> Result<(Self, ErrorReceiver), ConnectionError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let metrics = config.metrics.clone().unwrap_or_default();

        let (router_handle, _worker_handle, error_receiver) = spawn_router(
            stream,
            RouterConfig {
                version: config.protocol_version,
                compression: config.compression,
                event_sender: config.event_sender.clone(),
                keepalive_interval: config.keepalive_interval,
                keepalive_timeout: config.keepalive_timeout,
                max_in_flight: config.max_in_flight,
                metrics: Arc::clone(&metrics),
            },
            Arc::clone(&state),
        );

        let mut connection = Connection {
            _worker_handle,
            router_handle,
            config,
            compression: None,
            state,
            keyspace: KeyspaceGate::new(),
            prepared: PreparedCache::new(),
            metrics,
        };

        connection.advance_state(ConnectionState::Negotiating);
        connection.handshake().await?;
        connection.advance_state(ConnectionState::Ready);
        debug!(
            version = ?connection.config.protocol_version,
            compression = ?connection.compression,
            "Connection ready"
        );

        Ok((connection, error_receiver))
    }

    /// Current state of the connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until the connection is [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        // The sender lives as long as `self`.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Closes the connection. Requests in flight fail with a broken connection
    /// error.
    pub async fn close(&self) {
        self.advance_state(ConnectionState::Closing);
        self.closed().await;
    }

    /// Protocol version spoken on the connection.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.config.protocol_version
    }

    /// Compression negotiated with the node.
    pub fn compression(&self) -> Option<Compression> {
        self.compression
    }

    /// Traffic counters of the connection.
    pub fn metrics(&self) -> &Arc<ConnectionMetrics> {
        &self.metrics
    }

    /// The keyspace the connection is bound to.
    pub async fn current_keyspace(&self) -> Option<VerifiedKeyspaceName> {
        self.keyspace.current().await
    }

    fn advance_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state >= next {
                return false;
            }
            trace!(from = ?*state, to = ?next, "Connection state change");
            *state = next;
            true
        });
    }

    /// Executes an unprepared statement. Values are serialized with the CQL
    /// type they naturally map to.
    pub async fn query(
        &self,
        statement: impl Into<Statement>,
        values: &[Option<CqlValue>],
    ) -> Result<QueryResult, QueryError> {
        self.query_paged(statement, values, None).await
    }

    /// Fetches the page of `statement` starting at `paging_state`, the first
    /// page if it is `None`. The result carries the paging state of the next
    /// page, if any.
    pub async fn query_paged(
        &self,
        statement: impl Into<Statement>,
        values: &[Option<CqlValue>],
        paging_state: Option<Bytes>,
    ) -> Result<QueryResult, QueryError> {
        let statement: Statement = statement.into();
        let values = self.serialize_untyped(values)?;
        let timeout = statement
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let _guard = self.enter_keyspace(&statement.config).await?;
            let query_frame = self.query_frame(&statement, &values, paging_state);
            self.send_request(&query_frame, true, statement.config.tracing, None)
                .await?
                .into_query_result()
        })
        .await
    }

    /// Like [`Connection::query_paged`], but rows are decoded while they are
    /// read off the socket. See [`UnbufferedRowSet`](crate::response::UnbufferedRowSet).
    pub async fn query_unbuffered(
        &self,
        statement: impl Into<Statement>,
        values: &[Option<CqlValue>],
        paging_state: Option<Bytes>,
    ) -> Result<UnbufferedResult, QueryError> {
        let statement: Statement = statement.into();
        let values = self.serialize_untyped(values)?;
        let timeout = statement
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let _guard = self.enter_keyspace(&statement.config).await?;
            let query_frame = self.query_frame(&statement, &values, paging_state);
            self.send_request_unbuffered(&query_frame, statement.config.tracing, None)
                .await
        })
        .await
    }

    /// Prepares `statement`, or returns the statement already prepared on this
    /// connection with the same text in the same keyspace. The returned
    /// statement takes the settings of `statement`.
    pub async fn prepare(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<PreparedStatement, QueryError> {
        let statement: Statement = statement.into();
        let timeout = statement
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let guard = self.enter_keyspace(&statement.config).await?;
            let keyspace = (*guard).as_ref();
            let prepared = self
                .prepared
                .get_or_prepare(keyspace, &statement.contents, || {
                    self.prepare_request(&statement.contents, statement.config.tracing)
                })
                .await?;
            Ok(Self::with_statement_settings(prepared, &statement))
        })
        .await
    }

    /// Executes a prepared statement. `values` are type checked against its
    /// bind markers.
    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: &[Option<CqlValue>],
    ) -> Result<QueryResult, QueryError> {
        self.execute_paged(prepared, values, None).await
    }

    /// Fetches a page of a prepared statement, see [`Connection::query_paged`].
    pub async fn execute_paged(
        &self,
        prepared: &PreparedStatement,
        values: &[Option<CqlValue>],
        paging_state: Option<Bytes>,
    ) -> Result<QueryResult, QueryError> {
        let values = prepared.serialize_values(values, self.protocol_version())?;
        self.execute_raw(prepared, &values, paging_state).await
    }

    /// Executes a prepared statement with values serialized beforehand, e.g.
    /// by [`PreparedStatement::serialize_values_with_unset`].
    pub async fn execute_raw(
        &self,
        prepared: &PreparedStatement,
        values: &SerializedValues,
        paging_state: Option<Bytes>,
    ) -> Result<QueryResult, QueryError> {
        let timeout = prepared
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let guard = self.enter_keyspace(&prepared.config).await?;
            let keyspace = (*guard).as_ref();
            self.ensure_prepared(prepared, keyspace).await?;

            let mut repreparations = 0;
            loop {
                let (execute_frame, cached_metadata) =
                    self.execute_frame(prepared, values, paging_state.clone());
                let result = self
                    .send_request(
                        &execute_frame,
                        true,
                        prepared.config.tracing,
                        cached_metadata.as_ref(),
                    )
                    .await
                    .and_then(QueryResponse::into_query_result);

                match result {
                    Ok(result) => {
                        if let Some(rows) = result.rows() {
                            Self::handle_new_result_metadata(
                                prepared,
                                rows.new_metadata_id(),
                                rows.metadata(),
                            );
                        }
                        return Ok(result);
                    }
                    Err(err) => match self.unprepared_id(&err, &mut repreparations) {
                        Some(_) => self.reprepare(prepared, keyspace).await?,
                        None => return Err(err),
                    },
                }
            }
        })
        .await
    }

    /// Like [`Connection::execute_paged`], but rows are decoded while they
    /// are read off the socket.
    pub async fn execute_unbuffered(
        &self,
        prepared: &PreparedStatement,
        values: &[Option<CqlValue>],
        paging_state: Option<Bytes>,
    ) -> Result<UnbufferedResult, QueryError> {
        let values = prepared.serialize_values(values, self.protocol_version())?;
        let timeout = prepared
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let guard = self.enter_keyspace(&prepared.config).await?;
            let keyspace = (*guard).as_ref();
            self.ensure_prepared(prepared, keyspace).await?;

            let mut repreparations = 0;
            loop {
                let (execute_frame, cached_metadata) =
                    self.execute_frame(prepared, &values, paging_state.clone());
                let result = self
                    .send_request_unbuffered(
                        &execute_frame,
                        prepared.config.tracing,
                        cached_metadata.as_ref(),
                    )
                    .await;

                match result {
                    Ok(result) => {
                        if let UnbufferedResult::Rows(rows) = &result {
                            Self::handle_new_result_metadata(
                                prepared,
                                rows.new_metadata_id(),
                                rows.metadata(),
                            );
                        }
                        return Ok(result);
                    }
                    Err(err) => match self.unprepared_id(&err, &mut repreparations) {
                        Some(_) => self.reprepare(prepared, keyspace).await?,
                        None => return Err(err),
                    },
                }
            }
        })
        .await
    }

    /// Executes a batch. `values` holds one list per statement; unprepared
    /// statements with values are prepared on the connection first.
    pub async fn batch(
        &self,
        batch: &Batch,
        values: &[Vec<Option<CqlValue>>],
    ) -> Result<QueryResult, QueryError> {
        let statements_count = batch.statements.len();
        if statements_count > u16::MAX as usize {
            return Err(BadQuery::TooManyQueriesInBatchStatement(statements_count).into());
        }
        if values.len() != statements_count {
            return Err(BadQuery::ValuesCountMismatch(values.len(), statements_count).into());
        }
        let timeout = batch
            .config
            .determine_request_timeout(self.config.request_timeout);

        self.run_request(timeout, async {
            let guard = self.enter_keyspace(&batch.config).await?;
            let keyspace = (*guard).as_ref();
            let prepared = self.prepare_batch(batch, values, keyspace).await?;

            let serialized_values = prepared
                .iter()
                .zip(values)
                .map(|(prepared, values)| match prepared {
                    Some(prepared) => prepared.serialize_values(values, self.protocol_version()),
                    None => Ok(SerializedValues::new()),
                })
                .collect::<Result<Vec<_>, _>>()?;

            let statements = batch
                .statements
                .iter()
                .zip(&prepared)
                .map(|(statement, prepared)| match prepared {
                    Some(prepared) => request::batch::BatchStatement::Prepared {
                        id: Cow::Borrowed(prepared.get_id().as_ref()),
                    },
                    None => request::batch::BatchStatement::Query {
                        text: Cow::Borrowed(statement.contents()),
                    },
                })
                .collect::<Vec<_>>();

            let batch_frame = request::Batch {
                statements: Cow::Owned(statements),
                batch_type: batch.get_type(),
                consistency: batch
                    .config
                    .determine_consistency(self.config.default_consistency),
                serial_consistency: batch
                    .config
                    .determine_serial_consistency(self.config.default_serial_consistency),
                timestamp: batch.config.timestamp,
                values: serialized_values,
            };

            let mut repreparations = 0;
            loop {
                let result = self
                    .send_request(&batch_frame, true, batch.config.tracing, None)
                    .await
                    .and_then(QueryResponse::into_query_result);

                let err = match result {
                    Ok(result) => return Ok(result),
                    Err(err) => err,
                };
                let statement_id = match self.unprepared_id(&err, &mut repreparations) {
                    Some(statement_id) => statement_id.clone(),
                    None => return Err(err),
                };
                let Some(unprepared) = prepared
                    .iter()
                    .flatten()
                    .find(|prepared| *prepared.get_id() == statement_id)
                else {
                    return Err(QueryError::RepreparedIdMissingInBatch(statement_id.to_vec()));
                };
                self.reprepare(unprepared, keyspace).await?;
            }
        })
        .await
    }

    /// Switches the connection to `keyspace_name`, waiting for the requests
    /// in flight bound to another keyspace.
    pub async fn use_keyspace(
        &self,
        keyspace_name: impl Into<String>,
        case_sensitive: bool,
    ) -> Result<(), QueryError> {
        let keyspace = VerifiedKeyspaceName::new(keyspace_name.into(), case_sensitive)?;
        self.run_request(
            self.config.request_timeout,
            self.keyspace
                .switch(&keyspace, || self.use_keyspace_request(&keyspace)),
        )
        .await
    }

    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let supported = self.get_options().await?;

        let mut startup_options = HashMap::new();
        startup_options.insert(
            Cow::Borrowed(options::CQL_VERSION),
            Cow::Borrowed(options::DEFAULT_CQL_VERSION),
        );
        startup_options.insert(
            Cow::Borrowed(options::DRIVER_NAME),
            Cow::Borrowed(options::DEFAULT_DRIVER_NAME),
        );
        startup_options.insert(
            Cow::Borrowed(options::DRIVER_VERSION),
            Cow::Borrowed(options::DEFAULT_DRIVER_VERSION),
        );
        if let Some(compression) = self.config.compression {
            if supported.offers(options::COMPRESSION, compression.as_str()) {
                startup_options.insert(
                    Cow::Borrowed(options::COMPRESSION),
                    Cow::Borrowed(compression.as_str()),
                );
                self.compression = Some(compression);
            } else {
                warn!(
                    compression = compression.as_str(),
                    "Requested compression is not supported by the node. Falling back to no compression"
                );
            }
        }

        match self.startup(startup_options).await? {
            NonErrorStartupResponse::Ready => {}
            NonErrorStartupResponse::Authenticate(authenticate) => {
                self.perform_authenticate(&authenticate).await?;
            }
        }

        if self.config.event_sender.is_some() {
            self.register().await?;
        }

        if let Some(keyspace) = self.config.keyspace.clone() {
            self.keyspace
                .switch(&keyspace, || self.use_keyspace_request(&keyspace))
                .await
                .map_err(ConnectionError::UseKeyspace)?;
        }

        Ok(())
    }

    async fn setup_request(
        &self,
        kind: CqlRequestKind,
        request: &impl SerializableRequest,
    ) -> Result<NonErrorResponse, ConnectionError> {
        let err = |error: QueryError| -> ConnectionError {
            match error {
                QueryError::BrokenConnection(broken) => ConnectionError::BrokenConnection(broken),
                error => ConnectionSetupRequestError::new(kind, error).into(),
            }
        };

        let response = self
            .send_request(request, false, false, None)
            .await
            .map_err(err)?;
        response
            .response
            .into_non_error_response()
            .map_err(|db_error| err(db_error.into()))
    }

    async fn get_options(&self) -> Result<Supported, ConnectionError> {
        match self
            .setup_request(CqlRequestKind::Options, &request::Options)
            .await?
        {
            NonErrorResponse::Supported(supported) => Ok(supported),
            other => Err(unexpected_setup_response(CqlRequestKind::Options, &other)),
        }
    }

    async fn startup(
        &self,
        options: HashMap<Cow<'_, str>, Cow<'_, str>>,
    ) -> Result<NonErrorStartupResponse, ConnectionError> {
        match self
            .setup_request(CqlRequestKind::Startup, &request::Startup { options })
            .await?
        {
            NonErrorResponse::Ready => Ok(NonErrorStartupResponse::Ready),
            NonErrorResponse::Authenticate(authenticate) => {
                Ok(NonErrorStartupResponse::Authenticate(authenticate))
            }
            other => Err(unexpected_setup_response(CqlRequestKind::Startup, &other)),
        }
    }

    async fn perform_authenticate(
        &self,
        authenticate: &Authenticate,
    ) -> Result<(), ConnectionError> {
        let err = |kind: ConnectionSetupRequestErrorKind| -> ConnectionError {
            ConnectionSetupRequestError::new(CqlRequestKind::AuthResponse, kind).into()
        };

        let Some(authenticator_provider) = self.config.authenticator.as_ref() else {
            return Err(err(ConnectionSetupRequestErrorKind::MissingAuthentication));
        };
        debug!(
            authenticator = authenticate.authenticator_name.as_str(),
            "Authenticating"
        );

        let (mut response, mut auth_session) = authenticator_provider
            .start_authentication_session(&authenticate.authenticator_name)
            .await
            .map_err(|e| err(ConnectionSetupRequestErrorKind::StartAuthSessionError(e)))?;

        loop {
            match self.authenticate_response(response).await? {
                NonErrorAuthResponse::AuthChallenge(challenge) => {
                    response = auth_session
                        .evaluate_challenge(challenge.authenticate_message.as_deref())
                        .await
                        .map_err(|e| {
                            err(ConnectionSetupRequestErrorKind::AuthChallengeEvaluationError(e))
                        })?;
                }
                NonErrorAuthResponse::AuthSuccess(success) => {
                    auth_session
                        .success(success.success_message.as_deref())
                        .await
                        .map_err(|e| err(ConnectionSetupRequestErrorKind::AuthFinishError(e)))?;
                    return Ok(());
                }
            }
        }
    }

    async fn authenticate_response(
        &self,
        response: Option<Vec<u8>>,
    ) -> Result<NonErrorAuthResponse, ConnectionError> {
        match self
            .setup_request(
                CqlRequestKind::AuthResponse,
                &request::AuthResponse { response },
            )
            .await?
        {
            NonErrorResponse::AuthSuccess(success) => Ok(NonErrorAuthResponse::AuthSuccess(success)),
            NonErrorResponse::AuthChallenge(challenge) => {
                Ok(NonErrorAuthResponse::AuthChallenge(challenge))
            }
            other => Err(unexpected_setup_response(CqlRequestKind::AuthResponse, &other)),
        }
    }

    async fn register(&self) -> Result<(), ConnectionError> {
        let register_frame = request::Register {
            event_types_to_register_for: vec![
                EventType::TopologyChange,
                EventType::StatusChange,
                EventType::SchemaChange,
            ],
        };

        match self
            .setup_request(CqlRequestKind::Register, &register_frame)
            .await?
        {
            NonErrorResponse::Ready => Ok(()),
            other => Err(unexpected_setup_response(CqlRequestKind::Register, &other)),
        }
    }

    async fn use_keyspace_request(&self, keyspace: &VerifiedKeyspaceName) -> Result<(), QueryError> {
        // Bound values are not accepted in USE.
        let query_frame = query::Query {
            contents: Cow::Owned(keyspace.use_statement()),
            parameters: query::QueryParameters {
                consistency: self.config.default_consistency,
                ..Default::default()
            },
        };

        let response = self
            .send_request(&query_frame, true, false, None)
            .await?
            .into_non_error_query_response()?;

        match response.as_set_keyspace() {
            Some(set_keyspace)
                if set_keyspace
                    .keyspace_name
                    .eq_ignore_ascii_case(keyspace.as_str()) =>
            {
                Ok(())
            }
            Some(set_keyspace) => Err(QueryError::KeyspaceNameMismatch {
                expected_keyspace_name_lowercase: keyspace.as_str().to_lowercase(),
                result_keyspace_name_lowercase: set_keyspace.keyspace_name.to_lowercase(),
            }),
            None => Err(QueryError::UnexpectedResponse(
                response.response.to_response_kind(),
            )),
        }
    }

    // Holds the connection in the keyspace of the statement, or in the
    // current one if the statement names none, until the guard is dropped.
    async fn enter_keyspace(&self, config: &StatementConfig) -> Result<KeyspaceGuard<'_>, QueryError> {
        match &config.keyspace {
            Some(keyspace) => {
                self.keyspace
                    .enter(keyspace, || self.use_keyspace_request(keyspace))
                    .await
            }
            None => Ok(self.keyspace.hold().await),
        }
    }

    async fn prepare_request(
        &self,
        contents: &str,
        tracing: bool,
    ) -> Result<PreparedStatement, QueryError> {
        let prepare_frame = request::Prepare {
            query: Cow::Borrowed(contents),
        };
        let response = self
            .send_request(&prepare_frame, true, tracing, None)
            .await?
            .into_non_error_query_response()?;

        match response.response {
            NonErrorResponse::Result(result::Result::Prepared(prepared)) => {
                trace!(id = ?prepared.id, statement = contents, "Statement prepared");
                Ok(PreparedStatement::new(
                    prepared.id,
                    prepared.prepared_metadata,
                    prepared.result_metadata_id,
                    prepared.result_metadata,
                    contents.to_owned(),
                    None,
                    StatementConfig::default(),
                ))
            }
            other => Err(QueryError::UnexpectedResponse(other.to_response_kind())),
        }
    }

    // Prepares `prepared` on this connection, unless it already is.
    async fn ensure_prepared(
        &self,
        prepared: &PreparedStatement,
        keyspace: Option<&VerifiedKeyspaceName>,
    ) -> Result<(), QueryError> {
        let on_connection = self
            .prepared
            .get_or_prepare(keyspace, prepared.get_statement(), || {
                self.prepare_request(prepared.get_statement(), false)
            })
            .await?;
        check_same_id(prepared, &on_connection)
    }

    async fn reprepare(
        &self,
        prepared: &PreparedStatement,
        keyspace: Option<&VerifiedKeyspaceName>,
    ) -> Result<(), QueryError> {
        let reprepared = self
            .prepare_request(prepared.get_statement(), false)
            .await?;
        check_same_id(prepared, &reprepared)?;

        if let Some(id) = reprepared.get_result_metadata_id() {
            if prepared.get_result_metadata_id().as_ref() != Some(&id) {
                prepared.update_result_metadata(id, reprepared.get_result_metadata());
            }
        }
        self.prepared.insert(keyspace, reprepared);
        Ok(())
    }

    // The id of the statement to reprepare, if `err` asks for it and
    // attempts are left.
    fn unprepared_id<'e>(&self, err: &'e QueryError, repreparations: &mut usize) -> Option<&'e Bytes> {
        let QueryError::DbError(DbError::Unprepared { statement_id }, _) = err else {
            return None;
        };
        if *repreparations >= self.config.reprepare_attempts {
            debug!(
                ?statement_id,
                "Statement still unprepared after repreparation, giving up"
            );
            return None;
        }
        *repreparations += 1;
        debug!(
            ?statement_id,
            attempt = *repreparations,
            "Statement is not prepared on the node, repreparing"
        );
        Some(statement_id)
    }

    fn handle_new_result_metadata(
        prepared: &PreparedStatement,
        new_metadata_id: Option<&Bytes>,
        metadata: &Arc<ResultMetadata>,
    ) {
        // Protocol v5 only: the node sent new metadata along the rows.
        if let Some(id) = new_metadata_id {
            debug!(new_id = ?id, "Result metadata of prepared statement changed");
            prepared.update_result_metadata(id.clone(), Arc::clone(metadata));
        }
    }

    // For each statement of `batch`, the statement it is sent as, if prepared.
    async fn prepare_batch(
        &self,
        batch: &Batch,
        values: &[Vec<Option<CqlValue>>],
        keyspace: Option<&VerifiedKeyspaceName>,
    ) -> Result<Vec<Option<PreparedStatement>>, QueryError> {
        let mut prepared_statements = Vec::with_capacity(batch.statements.len());
        for (statement, values) in batch.statements.iter().zip(values) {
            let prepared = match statement {
                BatchStatement::Query(_) if values.is_empty() => None,
                BatchStatement::Query(statement) => Some(
                    self.prepared
                        .get_or_prepare(keyspace, &statement.contents, || {
                            self.prepare_request(&statement.contents, false)
                        })
                        .await?,
                ),
                BatchStatement::PreparedStatement(prepared) => {
                    self.ensure_prepared(prepared, keyspace).await?;
                    Some(prepared.clone())
                }
            };
            prepared_statements.push(prepared);
        }
        Ok(prepared_statements)
    }

    fn with_statement_settings(
        mut prepared: PreparedStatement,
        statement: &Statement,
    ) -> PreparedStatement {
        prepared.config = statement.config.clone();
        match statement.get_page_size() {
            Some(page_size) => prepared.set_page_size(page_size),
            None => prepared.disable_paging(),
        }
        prepared
    }

    fn serialize_untyped(&self, values: &[Option<CqlValue>]) -> Result<SerializedValues, QueryError> {
        let mut serialized = SerializedValues::new();
        for value in values {
            serialized.add_untyped(value.as_ref(), self.protocol_version())?;
        }
        Ok(serialized)
    }

    fn query_parameters<'v>(
        &self,
        config: &StatementConfig,
        page_size: Option<i32>,
        paging_state: Option<Bytes>,
        skip_metadata: bool,
        values: &'v SerializedValues,
    ) -> query::QueryParameters<'v> {
        query::QueryParameters {
            consistency: config.determine_consistency(self.config.default_consistency),
            serial_consistency: config
                .determine_serial_consistency(self.config.default_serial_consistency),
            timestamp: config.timestamp,
            page_size,
            paging_state,
            skip_metadata,
            values: Cow::Borrowed(values),
        }
    }

    fn query_frame<'s>(
        &self,
        statement: &'s Statement,
        values: &'s SerializedValues,
        paging_state: Option<Bytes>,
    ) -> query::Query<'s> {
        query::Query {
            contents: Cow::Borrowed(&statement.contents),
            parameters: self.query_parameters(
                &statement.config,
                statement.get_page_size(),
                paging_state,
                false,
                values,
            ),
        }
    }

    fn execute_frame<'v>(
        &self,
        prepared: &PreparedStatement,
        values: &'v SerializedValues,
        paging_state: Option<Bytes>,
    ) -> (execute::Execute<'v>, Option<Arc<ResultMetadata>>) {
        let version = self.protocol_version();
        // v5 nodes send new metadata whenever it changed, so skipping it is safe.
        let skip_metadata =
            prepared.get_use_cached_result_metadata() || version.has_result_metadata_id();
        let cached_metadata = skip_metadata.then(|| prepared.get_result_metadata());
        let result_metadata_id = version
            .has_result_metadata_id()
            .then(|| prepared.get_result_metadata_id().unwrap_or_default());

        let execute_frame = execute::Execute {
            id: prepared.get_id().clone(),
            result_metadata_id,
            parameters: self.query_parameters(
                &prepared.config,
                prepared.get_page_size(),
                paging_state,
                skip_metadata,
                values,
            ),
        };
        (execute_frame, cached_metadata)
    }

    // Bounds `request` by `timeout`. Dropping the request on expiry orphans
    // its stream id.
    async fn run_request<T>(
        &self,
        timeout: Option<Duration>,
        request: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        let start = Instant::now();
        let result = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, request).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(?timeout, "Request timed out");
                    self.metrics.inc_timeouts();
                    Err(QueryError::RequestTimeout(timeout))
                }
            },
            None => request.await,
        };
        match &result {
            Ok(_) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                if let Err(err) = self.metrics.log_request_latency(latency_ms) {
                    trace!(latency_ms, error = %err, "Request latency not recorded");
                }
            }
            Err(_) => self.metrics.inc_errors(),
        }
        result
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compress: bool,
        tracing: bool,
        cached_metadata: Option<&Arc<ResultMetadata>>,
    ) -> Result<QueryResponse, QueryError> {
        let compression = if compress { self.compression } else { None };

        let (params, opcode, body) = self
            .router_handle
            .send_request(request, compression, tracing, false)
            .await?
            .into_buffered()
            .await?;

        self.parse_response(params, opcode, body, cached_metadata)
    }

    async fn send_request_unbuffered(
        &self,
        request: &impl SerializableRequest,
        tracing: bool,
        cached_metadata: Option<&Arc<ResultMetadata>>,
    ) -> Result<UnbufferedResult, QueryError> {
        let TaskResponse {
            params,
            opcode,
            body,
        } = self
            .router_handle
            .send_request(request, self.compression, tracing, true)
            .await?;

        match body {
            ResponseBody::Streamed { length, chunks } => {
                let result = read_unbuffered(
                    params.flags,
                    StreamedBody::new(length, chunks),
                    self.protocol_version(),
                    cached_metadata,
                )
                .await?;
                if let UnbufferedResult::Rows(rows) = &result {
                    log_warnings(rows.warnings());
                }
                Ok(result)
            }
            // Compressed, or not a RESULT.
            ResponseBody::Buffered(body) => self
                .parse_response(params, opcode, body, cached_metadata)?
                .into_query_result()
                .map(UnbufferedResult::Other),
        }
    }

    fn parse_response(
        &self,
        params: FrameParams,
        opcode: ResponseOpcode,
        body: Bytes,
        cached_metadata: Option<&Arc<ResultMetadata>>,
    ) -> Result<QueryResponse, QueryError> {
        let body_with_ext =
            frame::parse_response_body_extensions(params.flags, self.compression, body)?;

        log_warnings(body_with_ext.warnings.iter().map(String::as_str));

        let response = Response::deserialize(
            self.protocol_version(),
            opcode,
            body_with_ext.body,
            cached_metadata,
        )?;

        Ok(QueryResponse {
            response,
            warnings: body_with_ext.warnings,
            tracing_id: body_with_ext.trace_id,
            custom_payload: body_with_ext.custom_payload,
        })
    }
}

fn log_warnings<'a>(warnings: impl Iterator<Item = &'a str>) {
    for warning in warnings {
        warn!(warning, "Response from the database contains a warning");
    }
}

fn unexpected_setup_response(kind: CqlRequestKind, response: &NonErrorResponse) -> ConnectionError {
    ConnectionSetupRequestError::new(
        kind,
        QueryError::UnexpectedResponse(response.to_response_kind()),
    )
    .into()
}

// Ids are hashes of the statement text, so they must not change across
// preparations.
fn check_same_id(
    expected: &PreparedStatement,
    reprepared: &PreparedStatement,
) -> Result<(), QueryError> {
    if expected.get_id() != reprepared.get_id() {
        return Err(QueryError::RepreparedIdChanged {
            statement: expected.get_statement().to_owned(),
            expected_id: expected.get_id().to_vec(),
            reprepared_id: reprepared.get_id().to_vec(),
        });
    }
    Ok(())
}

/// Opens a TCP connection to `addr` and runs the handshake over it.
pub async fn open_connection(
    addr: SocketAddr,
    config: ConnectionConfig,
) -> Result<(Connection, ErrorReceiver), ConnectionError> {
    debug!(%addr, "Opening connection");
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
    {
        Ok(stream) => stream?,
        Err(_) => return Err(ConnectionError::ConnectTimeout),
    };
    stream.set_nodelay(config.tcp_nodelay)?;

    if let Some(tcp_keepalive_interval) = config.tcp_keepalive_interval {
        setup_tcp_keepalive(&stream, tcp_keepalive_interval)?;
    }

    Connection::from_stream(stream, config).await
}

fn setup_tcp_keepalive(stream: &TcpStream, tcp_keepalive_interval: Duration) -> std::io::Result<()> {
    // Our interval is the idle time before probes start, which socket2 calls
    // "time". Its "interval" is the time between probes.
    let mut tcp_keepalive = TcpKeepalive::new().with_time(tcp_keepalive_interval);

    // These cfg values are taken from socket2 library, which uses the same constraints.
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "tvos",
        target_os = "watchos",
        target_os = "windows",
    ))]
    {
        tcp_keepalive = tcp_keepalive.with_interval(Duration::from_secs(1));
    }

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "tvos",
        target_os = "watchos",
    ))]
    {
        tcp_keepalive = tcp_keepalive.with_retries(10);
    }

    let sf = SockRef::from(stream);
    sf.set_tcp_keepalive(&tcp_keepalive)
}

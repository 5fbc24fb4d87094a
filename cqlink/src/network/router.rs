//! The task driving a connection's socket.
//!
//! Requests are handed to the router through [`RouterHandle::send_request`].
//! The router runs, on one tokio task:
//! - the writer, which reserves a stream id for each request and writes it,
//! - the reader, which dispatches responses to their requests by stream id
//!   and pushes server events to the event channel,
//! - the orphaner, which frees the state of requests whose futures were dropped,
//! - the keepaliver, which sends periodic heartbeats,
//! - the closer, which waits for [`ConnectionState::Closing`].
//!
//! The first of them to fail breaks the connection: every request in flight is
//! answered with the same [`BrokenConnectionError`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use cqlink_cql::frame::frame_errors::{CqlResponseParseError, FrameHeaderParseError};
use cqlink_cql::frame::protocol_version::ProtocolVersion;
use cqlink_cql::frame::request::{Options, SerializableRequest};
use cqlink_cql::frame::response::event::Event;
use cqlink_cql::frame::response::{Response, ResponseOpcode};
use cqlink_cql::frame::{self, Compression, FrameParams, SerializedRequest, FLAG_COMPRESSION};
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::ConnectionState;
use crate::errors::{
    BrokenConnectionError, BrokenConnectionErrorKind, CqlEventHandlingError, QueryError,
};
use crate::observability::metrics::ConnectionMetrics;

// The term "orphan" refers to stream ids that were allocated for a {request, response}
// no one is waiting for anymore (the `send_request` future was dropped, e.g. on timeout).
// A connection holding more than `OLD_ORPHAN_COUNT_THRESHOLD` orphans older than
// `OLD_AGE_ORPHAN_THRESHOLD` is broken.
const OLD_ORPHAN_COUNT_THRESHOLD: usize = 1024;
const OLD_AGE_ORPHAN_THRESHOLD: Duration = Duration::from_secs(1);

// Upper bound on the size of one chunk of a streamed RESULT body.
const STREAMED_CHUNK_SIZE: usize = 16 * 1024;

/// Receives the error that broke the connection, once.
pub type ErrorReceiver = oneshot::Receiver<BrokenConnectionError>;

type RequestId = u64;

pub(crate) struct RouterHandle {
    submit_channel: mpsc::Sender<Task>,

    // Each request sent by `send_request` needs a unique request id.
    request_id_generator: AtomicU64,
    // Unbounded, because `OrphanhoodNotifier` pushes into it from `Drop`.
    orphan_notification_sender: mpsc::UnboundedSender<RequestId>,
    version: ProtocolVersion,
}

impl RouterHandle {
    fn allocate_request_id(&self) -> RequestId {
        self.request_id_generator
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Sends `request` and waits for its response.
    ///
    /// With `streamed` set, a RESULT response is handed over as soon as its
    /// header is read and its body follows in chunks, see [`ResponseBody::Streamed`].
    pub(crate) async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compression: Option<Compression>,
        tracing: bool,
        streamed: bool,
    ) -> Result<TaskResponse, QueryError> {
        let serialized_request =
            SerializedRequest::make(request, self.version, compression, tracing)?;
        let request_id = self.allocate_request_id();

        let (response_sender, receiver) = oneshot::channel();
        let response_handler = ResponseHandler {
            response_sender,
            request_id,
            streamed,
        };

        // Dropping `notifier` before `disable()` marks the stream id of this
        // request as orphaned.
        let notifier = OrphanhoodNotifier::new(request_id, &self.orphan_notification_sender);

        self.submit_channel
            .send(Task {
                serialized_request,
                response_handler,
            })
            .await
            .map_err(|_| -> BrokenConnectionError {
                BrokenConnectionErrorKind::ChannelError.into()
            })?;

        let task_response = receiver.await.map_err(|_| -> BrokenConnectionError {
            BrokenConnectionErrorKind::ChannelError.into()
        })?;

        notifier.disable();

        task_response
    }
}

struct ResponseHandler {
    response_sender: oneshot::Sender<Result<TaskResponse, QueryError>>,
    request_id: RequestId,
    streamed: bool,
}

// Notifies the orphaner that a `send_request` future was dropped
// before receiving its response.
struct OrphanhoodNotifier<'a> {
    enabled: bool,
    request_id: RequestId,
    notification_sender: &'a mpsc::UnboundedSender<RequestId>,
}

impl<'a> OrphanhoodNotifier<'a> {
    fn new(
        request_id: RequestId,
        notification_sender: &'a mpsc::UnboundedSender<RequestId>,
    ) -> Self {
        Self {
            enabled: true,
            request_id,
            notification_sender,
        }
    }

    fn disable(mut self) {
        self.enabled = false;
    }
}

impl Drop for OrphanhoodNotifier<'_> {
    fn drop(&mut self) {
        if self.enabled {
            let _ = self.notification_sender.send(self.request_id);
        }
    }
}

struct Task {
    serialized_request: SerializedRequest,
    response_handler: ResponseHandler,
}

pub(crate) struct TaskResponse {
    pub(crate) params: FrameParams,
    pub(crate) opcode: ResponseOpcode,
    pub(crate) body: ResponseBody,
}

pub(crate) enum ResponseBody {
    Buffered(Bytes),
    /// The body of an uncompressed RESULT, read off the socket while the
    /// receiver consumes it. The reader does not touch the next frame until
    /// `length` bytes went through `chunks`; dropping the receiver makes the
    /// reader discard the rest.
    Streamed {
        length: usize,
        chunks: mpsc::Receiver<Bytes>,
    },
}

impl TaskResponse {
    /// Collects a streamed body. Used when a streamed request got a response
    /// which is not worth streaming after all.
    pub(crate) async fn into_buffered(self) -> Result<(FrameParams, ResponseOpcode, Bytes), QueryError> {
        let body = match self.body {
            ResponseBody::Buffered(body) => body,
            ResponseBody::Streamed { length, mut chunks } => {
                let mut body = BytesMut::with_capacity(length);
                while body.len() < length {
                    match chunks.recv().await {
                        Some(chunk) => body.put(chunk),
                        None => return Err(truncated_body_error(length - body.len(), length)),
                    }
                }
                body.freeze()
            }
        };
        Ok((self.params, self.opcode, body))
    }
}

/// The error seen by the consumer of a streamed body cut short by a broken connection.
pub(crate) fn truncated_body_error(missing: usize, length: usize) -> QueryError {
    let broken: BrokenConnectionError = BrokenConnectionErrorKind::FrameHeaderParseError(
        FrameHeaderParseError::ConnectionClosed(missing, length),
    )
    .into();
    broken.into()
}

pub(crate) struct RouterConfig {
    pub(crate) version: ProtocolVersion,
    pub(crate) compression: Option<Compression>,
    pub(crate) event_sender: Option<mpsc::Sender<Event>>,
    pub(crate) keepalive_interval: Option<Duration>,
    pub(crate) keepalive_timeout: Option<Duration>,
    pub(crate) max_in_flight: usize,
    pub(crate) metrics: Arc<ConnectionMetrics>,
}

/// Spawns the router over `stream`. Dropping the returned [`RemoteHandle`]
/// stops it.
pub(crate) fn spawn_router(
    stream: impl AsyncRead + AsyncWrite + Send + 'static,
    config: RouterConfig,
    state: Arc<watch::Sender<ConnectionState>>,
) -> (Arc<RouterHandle>, RemoteHandle<()>, ErrorReceiver) {
    let (sender, receiver) = mpsc::channel(1024);
    let (error_sender, error_receiver) = oneshot::channel();
    let (orphan_notification_sender, orphan_notification_receiver) = mpsc::unbounded_channel();

    let router_handle = Arc::new(RouterHandle {
        submit_channel: sender,
        request_id_generator: AtomicU64::new(0),
        orphan_notification_sender,
        version: config.version,
    });

    let (task, handle) = router(
        config,
        stream,
        receiver,
        error_sender,
        orphan_notification_receiver,
        Arc::clone(&router_handle),
        state,
    )
    .remote_handle();
    tokio::task::spawn(task);

    (router_handle, handle, error_receiver)
}

async fn router(
    config: RouterConfig,
    stream: impl AsyncRead + AsyncWrite,
    receiver: mpsc::Receiver<Task>,
    error_sender: oneshot::Sender<BrokenConnectionError>,
    orphan_notification_receiver: mpsc::UnboundedReceiver<RequestId>,
    router_handle: Arc<RouterHandle>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let (read_half, write_half) = split(stream);
    // Reader and writer run on the same task and never hold the lock across
    // an .await, so the mutex is uncontended. It only makes the future `Sync`.
    let handler_map = StdMutex::new(ResponseHandlerMap::new(
        config.max_in_flight.min(config.version.max_stream_ids()),
    ));

    let k = keepaliver(
        router_handle,
        config.keepalive_interval,
        config.keepalive_timeout,
    );
    let r = reader(
        BufReader::with_capacity(8192, read_half),
        &handler_map,
        config.event_sender,
        config.compression,
        config.version,
        &config.metrics,
    );
    let w = writer(
        BufWriter::with_capacity(8192, write_half),
        &handler_map,
        receiver,
        &config.metrics,
    );
    let o = orphaner(&handler_map, orphan_notification_receiver, &config.metrics);
    let c = closer(state.subscribe());

    let result = futures::try_join!(r, w, o, k, c);

    let error: BrokenConnectionError = match result {
        Ok(_) => return, // Connection was dropped, we can return
        Err(err) => err,
    };
    match error.downcast_ref::<BrokenConnectionErrorKind>() {
        Some(BrokenConnectionErrorKind::ClosedByClient) => debug!("Connection closed"),
        _ => error!(error = %error, "Connection broken"),
    }

    // Respond to all pending requests with the error
    let response_handlers = match handler_map.into_inner() {
        Ok(map) => map.into_handlers(),
        Err(poisoned) => poisoned.into_inner().into_handlers(),
    };
    for (_, handler) in response_handlers {
        // Ignore sending error, request was dropped
        let _ = handler.response_sender.send(Err(error.clone().into()));
    }

    state.send_replace(ConnectionState::Closed);

    // If someone is listening for connection errors notify them
    let _ = error_sender.send(error);
}

async fn reader(
    mut read_half: impl AsyncRead + Unpin,
    handler_map: &StdMutex<ResponseHandlerMap>,
    event_sender: Option<mpsc::Sender<Event>>,
    compression: Option<Compression>,
    version: ProtocolVersion,
    metrics: &ConnectionMetrics,
) -> Result<(), BrokenConnectionError> {
    loop {
        let (header, opcode) = frame::read_response_header(&mut read_half, version)
            .await
            .map_err(BrokenConnectionErrorKind::FrameHeaderParseError)?;
        let params = header.params;
        metrics.add_bytes_received(version.header_size() + header.length);

        match params.stream.cmp(&-1) {
            Ordering::Less => {
                // Negative streams other than -1 are reserved for the server
                // and not used by it, so skip such frames.
                read_body(&mut read_half, header.length).await?;
                continue;
            }
            Ordering::Equal => {
                let body = read_body(&mut read_half, header.length).await?;
                if let Some(event_sender) = event_sender.as_ref() {
                    handle_event(params, opcode, body, compression, version, event_sender)
                        .await
                        .map_err(BrokenConnectionErrorKind::CqlEventHandlingError)?;
                }
                continue;
            }
            _ => {}
        }

        let handler_lookup_res = lock(handler_map).lookup(params.stream);

        use HandlerLookupResult::*;
        match handler_lookup_res {
            Handler(handler) => {
                let streamed = handler.streamed
                    && opcode == ResponseOpcode::Result
                    && params.flags & FLAG_COMPRESSION == 0;
                if streamed {
                    let (chunk_sender, chunks) = mpsc::channel(1);
                    let _ = handler.response_sender.send(Ok(TaskResponse {
                        params,
                        opcode,
                        body: ResponseBody::Streamed {
                            length: header.length,
                            chunks,
                        },
                    }));
                    stream_body(&mut read_half, header.length, chunk_sender).await?;
                } else {
                    let body = read_body(&mut read_half, header.length).await?;
                    // A failed send means the requester stopped waiting.
                    let _ = handler.response_sender.send(Ok(TaskResponse {
                        params,
                        opcode,
                        body: ResponseBody::Buffered(body),
                    }));
                }
            }
            Missing => {
                // Unsolicited frame. Indicates a bug either in the driver, or in the database.
                debug!(
                    "Received response with unexpected StreamId {}",
                    params.stream
                );
                return Err(BrokenConnectionErrorKind::UnexpectedStreamId(params.stream).into());
            }
            Orphaned => {
                trace!(stream_id = params.stream, "Discarding late response");
                read_body(&mut read_half, header.length).await?;
            }
        }
    }
}

async fn read_body(
    read_half: &mut (impl AsyncRead + Unpin),
    length: usize,
) -> Result<Bytes, BrokenConnectionError> {
    frame::read_frame_body(read_half, length)
        .await
        .map_err(|err| BrokenConnectionErrorKind::FrameHeaderParseError(err).into())
}

// Forwards `length` bytes of body to `chunks`, waiting for the consumer to
// take each chunk. Once the consumer is gone, the rest is read and dropped.
async fn stream_body(
    read_half: &mut (impl AsyncRead + Unpin),
    length: usize,
    chunks: mpsc::Sender<Bytes>,
) -> Result<(), BrokenConnectionError> {
    let mut chunks = Some(chunks);
    let mut remaining = length;
    while remaining > 0 {
        let chunk_size = remaining.min(STREAMED_CHUNK_SIZE);
        let mut chunk = BytesMut::with_capacity(chunk_size);
        let n = read_half
            .read_buf(&mut (&mut chunk).limit(chunk_size))
            .await
            .map_err(|err| {
                BrokenConnectionErrorKind::FrameHeaderParseError(
                    FrameHeaderParseError::BodyChunkIoError(err),
                )
            })?;
        if n == 0 {
            return Err(BrokenConnectionErrorKind::FrameHeaderParseError(
                FrameHeaderParseError::ConnectionClosed(remaining, length),
            )
            .into());
        }
        remaining -= n;

        if let Some(sender) = chunks.as_ref() {
            if sender.send(chunk.freeze()).await.is_err() {
                trace!(remaining, "Row consumer went away, draining the rest of the body");
                chunks = None;
            }
        }
    }
    Ok(())
}

fn lock(handler_map: &StdMutex<ResponseHandlerMap>) -> std::sync::MutexGuard<'_, ResponseHandlerMap> {
    // Never contended, see `router`.
    match handler_map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn alloc_stream_id(
    handler_map: &StdMutex<ResponseHandlerMap>,
    response_handler: ResponseHandler,
) -> Option<i16> {
    match lock(handler_map).allocate(response_handler) {
        Ok(stream_id) => Some(stream_id),
        Err(response_handler) => {
            debug!("Could not allocate stream id, all are in use");
            let _ = response_handler
                .response_sender
                .send(Err(QueryError::UnableToAllocStreamId));
            None
        }
    }
}

async fn writer(
    mut write_half: impl AsyncWrite + Unpin,
    handler_map: &StdMutex<ResponseHandlerMap>,
    mut task_receiver: mpsc::Receiver<Task>,
    metrics: &ConnectionMetrics,
) -> Result<(), BrokenConnectionError> {
    // Ends when every `RouterHandle` is gone.
    while let Some(task) = task_receiver.recv().await {
        let mut num_requests = 0;
        let mut total_sent = 0;
        let mut next = Some(task);
        // Write everything already queued before flushing.
        while let Some(task) = next.take() {
            if let Some(stream_id) = alloc_stream_id(handler_map, task.response_handler) {
                let mut req = task.serialized_request;
                req.set_stream(stream_id);
                let req_data: &[u8] = req.get_data();
                total_sent += req_data.len();
                num_requests += 1;
                metrics.inc_requests(req_data.len());
                write_half
                    .write_all(req_data)
                    .await
                    .map_err(BrokenConnectionErrorKind::WriteError)?;
            }
            next = task_receiver.try_recv().ok();
        }
        trace!("Sending {} requests; {} bytes", num_requests, total_sent);
        write_half
            .flush()
            .await
            .map_err(BrokenConnectionErrorKind::WriteError)?;
    }

    Ok(())
}

// Receives notifications from `OrphanhoodNotifier`s and marks streams as
// orphaned. Periodically checks the count of old orphans and breaks the
// connection once it exceeds the threshold.
async fn orphaner(
    handler_map: &StdMutex<ResponseHandlerMap>,
    mut orphan_receiver: mpsc::UnboundedReceiver<RequestId>,
    metrics: &ConnectionMetrics,
) -> Result<(), BrokenConnectionError> {
    let mut interval = tokio::time::interval(OLD_AGE_ORPHAN_THRESHOLD);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let old_orphan_count = lock(handler_map).old_orphans_count();
                if old_orphan_count > OLD_ORPHAN_COUNT_THRESHOLD {
                    warn!(
                        "Too many old orphaned stream ids: {}",
                        old_orphan_count,
                    );
                    return Err(BrokenConnectionErrorKind::TooManyOrphanedStreamIds(
                        u16::try_from(old_orphan_count).unwrap_or(u16::MAX),
                    )
                    .into());
                }
            }
            Some(request_id) = orphan_receiver.recv() => {
                trace!(
                    "Trying to orphan stream id associated with request_id = {}",
                    request_id,
                );
                if lock(handler_map).orphan(request_id) {
                    metrics.inc_orphaned();
                }
            }
            else => { break }
        }
    }

    Ok(())
}

async fn keepaliver(
    router_handle: Arc<RouterHandle>,
    keepalive_interval: Option<Duration>,
    keepalive_timeout: Option<Duration>,
) -> Result<(), BrokenConnectionError> {
    async fn issue_keepalive_query(router_handle: &RouterHandle) -> Result<(), BrokenConnectionError> {
        router_handle
            .send_request(&Options, None, false, false)
            .await
            .map(|_| ())
            .map_err(|req_err| {
                BrokenConnectionErrorKind::KeepaliveRequestError(Arc::new(req_err)).into()
            })
    }

    let Some(keepalive_interval) = keepalive_interval else {
        // No keepalives are to be sent.
        return Ok(());
    };

    let mut interval = tokio::time::interval(keepalive_interval);
    interval.tick().await; // Use up the first, instant tick.

    // Default behaviour (Burst) is not suitable for sending keepalives.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let keepalive_query = issue_keepalive_query(&router_handle);
        let query_result = if let Some(timeout) = keepalive_timeout {
            match tokio::time::timeout(timeout, keepalive_query).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(
                        "Timed out while waiting for response to keepalive request after {:?}",
                        timeout
                    );
                    return Err(BrokenConnectionErrorKind::KeepaliveTimeout(timeout).into());
                }
            }
        } else {
            keepalive_query.await
        };
        if let Err(err) = query_result {
            warn!("Failed to execute keepalive request: {}", err);
            return Err(err);
        }

        trace!("Keepalive request successful");
    }
}

async fn closer(
    mut state: watch::Receiver<ConnectionState>,
) -> Result<(), BrokenConnectionError> {
    match state
        .wait_for(|state| *state == ConnectionState::Closing)
        .await
    {
        Ok(_) => Err(BrokenConnectionErrorKind::ClosedByClient.into()),
        // The connection is gone, and the router with it.
        Err(_) => Ok(()),
    }
}

async fn handle_event(
    params: FrameParams,
    opcode: ResponseOpcode,
    body: Bytes,
    compression: Option<Compression>,
    version: ProtocolVersion,
    event_sender: &mpsc::Sender<Event>,
) -> Result<(), CqlEventHandlingError> {
    let body = frame::parse_response_body_extensions(params.flags, compression, body)?.body;
    let event = match Response::deserialize(version, opcode, body, None) {
        Ok(Response::Event(event)) => event,
        Ok(response) => {
            error!("Expected to receive Event response, got {:?}", response);
            return Err(CqlEventHandlingError::UnexpectedResponse(
                response.to_response_kind(),
            ));
        }
        Err(CqlResponseParseError::CqlEventParseError(e)) => return Err(e.into()),
        Err(e) => return Err(CqlEventHandlingError::UnexpectedResponse(e.to_response_kind())),
    };
    trace!(?event, "Received server event");

    event_sender
        .send(event)
        .await
        .map_err(|_| CqlEventHandlingError::SendError)
}

struct OrphanageTracker {
    orphans: HashMap<i16, Instant>,
    by_orphaning_times: BTreeSet<(Instant, i16)>,
}

impl OrphanageTracker {
    fn new() -> Self {
        Self {
            orphans: HashMap::new(),
            by_orphaning_times: BTreeSet::new(),
        }
    }

    fn insert(&mut self, stream_id: i16) {
        let now = Instant::now();
        self.orphans.insert(stream_id, now);
        self.by_orphaning_times.insert((now, stream_id));
    }

    fn remove(&mut self, stream_id: i16) {
        if let Some(time) = self.orphans.remove(&stream_id) {
            self.by_orphaning_times.remove(&(time, stream_id));
        }
    }

    fn contains(&self, stream_id: i16) -> bool {
        self.orphans.contains_key(&stream_id)
    }

    fn orphans_older_than(&self, age: Duration) -> usize {
        let Some(minimal_age) = Instant::now().checked_sub(age) else {
            return 0;
        };
        // Linear in the number of old orphans only.
        self.by_orphaning_times
            .range(..(minimal_age, i16::MAX))
            .count()
    }
}

struct ResponseHandlerMap {
    stream_set: StreamIdSet,
    handlers: HashMap<i16, ResponseHandler>,

    request_to_stream: HashMap<RequestId, i16>,
    orphanage_tracker: OrphanageTracker,
}

enum HandlerLookupResult {
    Orphaned,
    Handler(ResponseHandler),
    Missing,
}

impl ResponseHandlerMap {
    fn new(max_in_flight: usize) -> Self {
        Self {
            stream_set: StreamIdSet::new(max_in_flight),
            handlers: HashMap::new(),
            request_to_stream: HashMap::new(),
            orphanage_tracker: OrphanageTracker::new(),
        }
    }

    fn allocate(&mut self, response_handler: ResponseHandler) -> Result<i16, ResponseHandler> {
        let Some(stream_id) = self.stream_set.allocate() else {
            return Err(response_handler);
        };
        self.request_to_stream
            .insert(response_handler.request_id, stream_id);
        let prev_handler = self.handlers.insert(stream_id, response_handler);
        debug_assert!(prev_handler.is_none());

        Ok(stream_id)
    }

    // Moves the stream id of `request_id` to the orphanage and drops its handler.
    // The id stays reserved until the late response arrives.
    fn orphan(&mut self, request_id: RequestId) -> bool {
        let Some(stream_id) = self.request_to_stream.remove(&request_id) else {
            return false;
        };
        debug!(
            "Orphaning stream_id = {} associated with request_id = {}",
            stream_id, request_id
        );
        self.orphanage_tracker.insert(stream_id);
        self.handlers.remove(&stream_id);
        true
    }

    fn old_orphans_count(&self) -> usize {
        self.orphanage_tracker
            .orphans_older_than(OLD_AGE_ORPHAN_THRESHOLD)
    }

    fn lookup(&mut self, stream_id: i16) -> HandlerLookupResult {
        if self.orphanage_tracker.contains(stream_id) {
            self.orphanage_tracker.remove(stream_id);
            self.stream_set.free(stream_id);
            return HandlerLookupResult::Orphaned;
        }

        if let Some(handler) = self.handlers.remove(&stream_id) {
            // Prevents a late orphan notification from orphaning the id again.
            self.request_to_stream.remove(&handler.request_id);
            self.stream_set.free(stream_id);

            HandlerLookupResult::Handler(handler)
        } else {
            HandlerLookupResult::Missing
        }
    }

    // Used after the connection breaks, to answer every waiting request.
    fn into_handlers(self) -> HashMap<i16, ResponseHandler> {
        self.handlers
    }
}

/// Free/used bitmap of the stream ids below a limit.
struct StreamIdSet {
    used_bitmap: Box<[u64]>,
    limit: usize,
}

impl StreamIdSet {
    fn new(limit: usize) -> Self {
        Self {
            used_bitmap: vec![0; limit.div_ceil(64)].into_boxed_slice(),
            limit,
        }
    }

    // Lowest free id.
    fn allocate(&mut self) -> Option<i16> {
        for (block_id, block) in self.used_bitmap.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones() as usize;
                let stream_id = block_id * 64 + off;
                if stream_id >= self.limit {
                    return None;
                }
                *block |= 1u64 << off;
                return i16::try_from(stream_id).ok();
            }
        }
        None
    }

    fn free(&mut self, stream_id: i16) {
        let Ok(stream_id) = usize::try_from(stream_id) else {
            return;
        };
        if let Some(block) = self.used_bitmap.get_mut(stream_id / 64) {
            *block &= !(1 << (stream_id % 64));
        }
    }
}

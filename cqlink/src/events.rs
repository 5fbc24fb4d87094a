//! Debouncing of server events into refreshes.
//!
//! Servers announce schema and topology changes in bursts: a single
//! `CREATE TABLE` reaches the client once per connection registered for
//! events, and migrations issue dozens of statements in a row. The
//! [`EventDebouncer`] collects such events for a short window and hands the
//! [`RefreshHandler`] the smallest set of refreshes that covers all of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cqlink_cql::frame::response::event::{Event, SchemaChangeTarget};
use futures::future::RemoteHandle;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Error returned by a [`RefreshHandler`].
pub type RefreshError = String;

/// What has to be refreshed after a burst of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    /// Topology, node status and the schema of every keyspace.
    Full,
    /// The whole schema of one keyspace.
    Keyspace(String),
    /// Some elements of one keyspace, in the order they were first announced.
    Elements {
        /// Keyspace the elements belong to.
        keyspace: String,
        /// Changed tables, types, functions and aggregates.
        targets: Vec<SchemaChangeTarget>,
    },
}

impl From<&Event> for RefreshRequest {
    fn from(event: &Event) -> Self {
        match event {
            Event::TopologyChange(_) | Event::StatusChange(_) => RefreshRequest::Full,
            Event::SchemaChange(change) => match &change.target {
                SchemaChangeTarget::Keyspace => RefreshRequest::Keyspace(change.keyspace.clone()),
                target => RefreshRequest::Elements {
                    keyspace: change.keyspace.clone(),
                    targets: vec![target.clone()],
                },
            },
        }
    }
}

/// Performs the refreshes decided by an [`EventDebouncer`].
///
/// Calls never overlap: the next one starts after the previous returned.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    /// Refreshes what `request` names. An error is reported to the callers
    /// whose events this refresh covered.
    async fn refresh(&self, request: RefreshRequest) -> Result<(), RefreshError>;
}

/// Timing of an [`EventDebouncer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncerConfig {
    /// Quiet period after the last event before the queue is processed.
    pub window: Duration,
    /// Upper bound on how long the first queued event waits, however
    /// often new events extend the window.
    pub max_delay: Duration,
}

impl Default for DebouncerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Why an event passed to [`EventDebouncer::handle_event`] was not handled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DebouncerError {
    /// The refresh covering the event failed.
    #[error("Refresh failed: {0}")]
    Handler(RefreshError),

    /// The debouncer was shut down before the event was processed.
    #[error("Event debouncer was shut down")]
    ShutDown,
}

type Waiter = oneshot::Sender<Result<(), DebouncerError>>;

enum Command {
    Schedule {
        event: Event,
        process_now: bool,
        waiter: Option<Waiter>,
    },
    Shutdown,
}

/// Coalesces events and runs the resulting refreshes on a background task.
///
/// Must be created within a tokio runtime. Dropping the debouncer stops the
/// task, as does [`EventDebouncer::shutdown`].
pub struct EventDebouncer {
    commands: mpsc::UnboundedSender<Command>,
    _worker_handle: RemoteHandle<()>,
}

impl EventDebouncer {
    /// Creates a debouncer processing events `window` after the last one,
    /// and at most `max_delay` after the first one.
    pub fn new(window: Duration, max_delay: Duration, handler: Arc<dyn RefreshHandler>) -> Self {
        Self::with_config(DebouncerConfig { window, max_delay }, handler)
    }

    /// Creates a debouncer with the timing of `config`.
    pub fn with_config(config: DebouncerConfig, handler: Arc<dyn RefreshHandler>) -> Self {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let worker = DebouncerWorker {
            config,
            handler,
            commands: command_receiver,
            queue: Queue::default(),
        };
        let (fut, _worker_handle) = worker.work().remote_handle();
        tokio::spawn(fut);

        EventDebouncer {
            commands,
            _worker_handle,
        }
    }

    /// Queues `event`. With `process_now` the queue is processed without
    /// waiting for the window to pass. Events scheduled after shutdown are
    /// dropped.
    pub fn schedule_event(&self, event: Event, process_now: bool) {
        let command = Command::Schedule {
            event,
            process_now,
            waiter: None,
        };
        if self.commands.send(command).is_err() {
            trace!("Event scheduled on a shut down debouncer, dropping it");
        }
    }

    /// Queues `event` and waits until the refresh covering it finished.
    pub async fn handle_event(&self, event: Event, process_now: bool) -> Result<(), DebouncerError> {
        let (waiter, done) = oneshot::channel();
        let command = Command::Schedule {
            event,
            process_now,
            waiter: Some(waiter),
        };
        self.commands
            .send(command)
            .map_err(|_| DebouncerError::ShutDown)?;
        // A dropped waiter means the worker is gone.
        done.await.unwrap_or(Err(DebouncerError::ShutDown))
    }

    /// Schedules every event received on `events`, until the channel is
    /// closed. Meant for the receiving end of
    /// [`ConnectionConfig::event_sender`](crate::network::ConnectionConfig::event_sender).
    pub async fn listen(&self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.schedule_event(event, false);
        }
        debug!("Event channel closed, stopped listening");
    }

    /// Stops processing. Queued events are dropped and their callers get
    /// [`DebouncerError::ShutDown`].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[derive(Default)]
struct KeyspaceBucket {
    // Refresh the whole keyspace; `targets` is then empty.
    whole: bool,
    targets: Vec<SchemaChangeTarget>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct Queue {
    // Some if a full refresh is queued. It subsumes every keyspace bucket.
    main: Option<Vec<Waiter>>,
    keyspaces: BTreeMap<String, KeyspaceBucket>,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
    process_now: bool,
}

impl Queue {
    fn is_empty(&self) -> bool {
        self.main.is_none() && self.keyspaces.is_empty()
    }

    fn push(&mut self, event: &Event, process_now: bool, waiter: Option<Waiter>) {
        let now = Instant::now();
        self.first_event.get_or_insert(now);
        self.last_event = Some(now);
        self.process_now |= process_now;

        if let Some(main_waiters) = &mut self.main {
            main_waiters.extend(waiter);
            return;
        }

        match RefreshRequest::from(event) {
            RefreshRequest::Full => {
                let mut waiters: Vec<Waiter> = std::mem::take(&mut self.keyspaces)
                    .into_values()
                    .flat_map(|bucket| bucket.waiters)
                    .collect();
                waiters.extend(waiter);
                self.main = Some(waiters);
            }
            RefreshRequest::Keyspace(keyspace) => {
                let bucket = self.keyspaces.entry(keyspace).or_default();
                bucket.whole = true;
                bucket.targets.clear();
                bucket.waiters.extend(waiter);
            }
            RefreshRequest::Elements { keyspace, targets } => {
                let bucket = self.keyspaces.entry(keyspace).or_default();
                if !bucket.whole {
                    for target in targets {
                        if !bucket.targets.contains(&target) {
                            bucket.targets.push(target);
                        }
                    }
                }
                bucket.waiters.extend(waiter);
            }
        }
    }

    fn deadline(&self, config: &DebouncerConfig) -> Option<Instant> {
        let (first, last) = (self.first_event?, self.last_event?);
        if self.process_now {
            return Some(Instant::now());
        }
        Some(std::cmp::min(last + config.window, first + config.max_delay))
    }

    fn fail_all(self, error: DebouncerError) {
        let waiters = self
            .main
            .into_iter()
            .flatten()
            .chain(self.keyspaces.into_values().flat_map(|bucket| bucket.waiters));
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

struct DebouncerWorker {
    config: DebouncerConfig,
    handler: Arc<dyn RefreshHandler>,
    commands: mpsc::UnboundedReceiver<Command>,
    queue: Queue,
}

impl DebouncerWorker {
    async fn work(mut self) {
        loop {
            let deadline = self.queue.deadline(&self.config);
            let sleep_future = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(sleep_future);

            tokio::select! {
                _ = &mut sleep_future => {
                    let queue = std::mem::take(&mut self.queue);
                    self.process(queue).await;
                }

                command = self.commands.recv() => match command {
                    Some(Command::Schedule { event, process_now, waiter }) => {
                        trace!(?event, process_now, "Event queued");
                        self.queue.push(&event, process_now, waiter);
                    }
                    // Senders are gone with the debouncer.
                    Some(Command::Shutdown) | None => {
                        debug!("Event debouncer shutting down");
                        std::mem::take(&mut self.queue).fail_all(DebouncerError::ShutDown);
                        return;
                    }
                },
            }
        }
    }

    async fn process(&self, queue: Queue) {
        if queue.is_empty() {
            return;
        }

        if let Some(waiters) = queue.main {
            self.refresh(RefreshRequest::Full, waiters).await;
            return;
        }

        for (keyspace, bucket) in queue.keyspaces {
            let request = match bucket.whole {
                true => RefreshRequest::Keyspace(keyspace),
                false => RefreshRequest::Elements {
                    keyspace,
                    targets: bucket.targets,
                },
            };
            self.refresh(request, bucket.waiters).await;
        }
    }

    async fn refresh(&self, request: RefreshRequest, waiters: Vec<Waiter>) {
        debug!(?request, waiters = waiters.len(), "Running debounced refresh");
        let result = self
            .handler
            .refresh(request.clone())
            .await
            .map_err(DebouncerError::Handler);
        if let Err(error) = &result {
            warn!(?request, %error, "Refresh failed");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use assert_matches::assert_matches;
    use cqlink_cql::frame::response::event::{
        SchemaChangeEvent, SchemaChangeType, StatusChangeEvent, TopologyChangeEvent,
    };

    use crate::utils::test_utils::setup_tracing;

    const WINDOW: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_millis(350);

    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<(RefreshRequest, Instant)>>,
        failing_keyspace: Option<String>,
        delay: Duration,
        busy: AtomicBool,
    }

    #[async_trait]
    impl RefreshHandler for Recorder {
        async fn refresh(&self, request: RefreshRequest) -> Result<(), RefreshError> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping refreshes");
            tokio::time::sleep(self.delay).await;
            self.busy.store(false, Ordering::SeqCst);

            self.calls
                .lock()
                .unwrap()
                .push((request.clone(), Instant::now()));
            match (&request, &self.failing_keyspace) {
                (RefreshRequest::Elements { keyspace, .. }, Some(failing))
                | (RefreshRequest::Keyspace(keyspace), Some(failing))
                    if keyspace == failing =>
                {
                    Err(format!("cannot refresh {keyspace}"))
                }
                _ => Ok(()),
            }
        }
    }

    impl Recorder {
        fn requests(&self) -> Vec<RefreshRequest> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(request, _)| request.clone())
                .collect()
        }
    }

    fn debouncer(recorder: &Arc<Recorder>) -> EventDebouncer {
        setup_tracing();
        EventDebouncer::new(WINDOW, MAX_DELAY, Arc::clone(recorder) as Arc<dyn RefreshHandler>)
    }

    fn table_created(keyspace: &str, table: &str) -> Event {
        Event::SchemaChange(SchemaChangeEvent {
            change_type: SchemaChangeType::Created,
            keyspace: keyspace.to_owned(),
            target: SchemaChangeTarget::Table(table.to_owned()),
        })
    }

    fn keyspace_updated(keyspace: &str) -> Event {
        Event::SchemaChange(SchemaChangeEvent {
            change_type: SchemaChangeType::Updated,
            keyspace: keyspace.to_owned(),
            target: SchemaChangeTarget::Keyspace,
        })
    }

    fn node_up() -> Event {
        let addr: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        Event::StatusChange(StatusChangeEvent::Up(addr))
    }

    #[test]
    fn events_map_to_refreshes() {
        let addr: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        assert_eq!(
            RefreshRequest::from(&Event::TopologyChange(TopologyChangeEvent::NewNode(addr))),
            RefreshRequest::Full
        );
        assert_eq!(
            RefreshRequest::from(&keyspace_updated("ks")),
            RefreshRequest::Keyspace("ks".to_owned())
        );
        assert_eq!(
            RefreshRequest::from(&table_created("ks", "t")),
            RefreshRequest::Elements {
                keyspace: "ks".to_owned(),
                targets: vec![SchemaChangeTarget::Table("t".to_owned())],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn events_within_the_window_coalesce() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);
        let start = Instant::now();

        let (a, b, c) = tokio::join!(
            debouncer.handle_event(table_created("ks", "t1"), false),
            debouncer.handle_event(table_created("ks", "t2"), false),
            debouncer.handle_event(table_created("ks", "t1"), false),
        );
        assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            RefreshRequest::Elements {
                keyspace: "ks".to_owned(),
                targets: vec![
                    SchemaChangeTarget::Table("t1".to_owned()),
                    SchemaChangeTarget::Table("t2".to_owned()),
                ],
            }
        );
        assert_eq!(calls[0].1 - start, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn keyspace_event_subsumes_its_elements() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);

        let (a, b, c) = tokio::join!(
            debouncer.handle_event(table_created("ks", "t1"), false),
            debouncer.handle_event(keyspace_updated("ks"), false),
            debouncer.handle_event(table_created("other", "t"), false),
        );
        assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
        assert_eq!(
            recorder.requests(),
            vec![
                RefreshRequest::Keyspace("ks".to_owned()),
                RefreshRequest::Elements {
                    keyspace: "other".to_owned(),
                    targets: vec![SchemaChangeTarget::Table("t".to_owned())],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_refresh_subsumes_keyspaces() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);

        let (a, b, c) = tokio::join!(
            debouncer.handle_event(table_created("ks", "t1"), false),
            debouncer.handle_event(node_up(), false),
            debouncer.handle_event(keyspace_updated("other"), false),
        );
        assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
        assert_eq!(recorder.requests(), vec![RefreshRequest::Full]);
    }

    #[tokio::test(start_paused = true)]
    async fn max_delay_bounds_a_steady_stream_of_events() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);
        let start = Instant::now();

        // Each event comes before the window of the previous one ends.
        for i in 0..8 {
            debouncer.schedule_event(table_created("ks", &format!("t{i}")), false);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        tokio::time::sleep(WINDOW * 2).await;

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1 - start, MAX_DELAY);
        assert_matches!(&calls[0].0, RefreshRequest::Elements { targets, .. } if targets.len() == 6);
        assert_matches!(&calls[1].0, RefreshRequest::Elements { targets, .. } if targets.len() == 2);
    }

    #[tokio::test(start_paused = true)]
    async fn process_now_skips_the_window() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);
        let start = Instant::now();

        debouncer.schedule_event(table_created("ks", "t1"), false);
        debouncer
            .handle_event(keyspace_updated("ks"), true)
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, RefreshRequest::Keyspace("ks".to_owned()));
        assert_eq!(calls[0].1, start);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_only_the_callers_of_the_failed_refresh() {
        let recorder = Arc::new(Recorder {
            failing_keyspace: Some("bad".to_owned()),
            ..Default::default()
        });
        let debouncer = debouncer(&recorder);

        let (bad, good) = tokio::join!(
            debouncer.handle_event(table_created("bad", "t"), false),
            debouncer.handle_event(table_created("good", "t"), false),
        );
        assert_eq!(bad, Err(DebouncerError::Handler("cannot refresh bad".to_owned())));
        assert_eq!(good, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn events_arriving_during_a_refresh_wait_for_the_next_one() {
        let recorder = Arc::new(Recorder {
            delay: WINDOW * 3,
            ..Default::default()
        });
        let debouncer = debouncer(&recorder);

        let late = async {
            // Arrives while the first refresh is running.
            tokio::time::sleep(WINDOW * 2).await;
            debouncer.handle_event(table_created("ks", "t2"), false).await
        };
        let (first, second) = tokio::join!(
            debouncer.handle_event(table_created("ks", "t1"), false),
            late
        );
        assert_eq!((first, second), (Ok(()), Ok(())));
        assert_eq!(recorder.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_queued_and_later_events() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);

        let queued = async {
            debouncer.handle_event(table_created("ks", "t"), false).await
        };
        let stop = async {
            tokio::task::yield_now().await;
            debouncer.shutdown();
        };
        let (queued, ()) = tokio::join!(queued, stop);
        assert_eq!(queued, Err(DebouncerError::ShutDown));
        assert_eq!(
            debouncer.handle_event(node_up(), true).await,
            Err(DebouncerError::ShutDown)
        );
        assert!(recorder.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn listen_schedules_received_events() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = debouncer(&recorder);
        let (sender, receiver) = mpsc::channel(8);

        sender.send(table_created("ks", "t")).await.unwrap();
        sender.send(keyspace_updated("ks")).await.unwrap();
        drop(sender);
        debouncer.listen(receiver).await;
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(
            recorder.requests(),
            vec![RefreshRequest::Keyspace("ks".to_owned())]
        );
    }
}

//! Connection management.
//!
//! [`Query`] is a cheap, cloneable handle to a background task that owns
//! the [`Dispatcher`] and the current transport. Handles talk to the task
//! over a channel, so commands can be submitted from anywhere without
//! locking.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::dispatcher::{Dispatcher, DispatcherConfig, State};
use crate::error::ClientError;
use crate::event::QueryEvent;
use crate::transport::{Connector, TcpConnector, TransportEvent, TransportHandle};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tsquery_protocol::{QueryError, Row, ERROR_PREFIX};

enum Request {
    Connect(oneshot::Sender<Result<(), ClientError>>),
    Submit {
        command: Command,
        priority: bool,
        reply: oneshot::Sender<Result<Vec<Row>, ClientError>>,
    },
    Pause(bool),
    KeepAlive(bool),
    State(oneshot::Sender<State>),
    Close(oneshot::Sender<()>),
}

/// Resolves to the rows of a submitted command.
///
/// Dropping it before the command is sent removes the command from the
/// queue.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Vec<Row>, ClientError>>,
}

impl Future for PendingResponse {
    type Output = Result<Vec<Row>, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(ClientError::ConnectionClosed)))
    }
}

/// Handle to a query connection.
#[derive(Clone)]
pub struct Query {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<QueryEvent>,
    connected: Arc<AtomicBool>,
    connect_timeout: Duration,
}

impl Query {
    /// Creates a TCP query connection (not yet connected).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self::with_connector(config, TcpConnector::new(config))
    }

    /// Creates a query connection over a custom transport.
    pub fn with_connector<C: Connector>(config: &ConnectionConfig, connector: C) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (requests, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            dispatcher: Dispatcher::new(DispatcherConfig::from(config), events.clone()),
            connector,
            transport: None,
            requests: rx,
            connected: connected.clone(),
            connect_waiters: Vec::new(),
            last_transport_error: None,
        };
        tokio::spawn(driver.run());

        Self {
            requests,
            events,
            connected,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Opens the transport and waits until the greeting has been read.
    ///
    /// Commands submitted before this resolves are held and sent once the
    /// session is ready.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Connect(tx))?;

        match tokio::time::timeout(self.connect_timeout, rx).await {
            Ok(res) => res.unwrap_or(Err(ClientError::ConnectionClosed)),
            Err(_) => {
                tracing::debug!("connect timed out waiting for the banner");
                let _ = self.close().await;
                Err(ClientError::Timeout)
            }
        }
    }

    /// Queues a command. Priority commands run before all normal ones.
    pub fn submit(&self, command: Command, priority: bool) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        let request = Request::Submit {
            command,
            priority,
            reply,
        };
        // If the driver is gone the reply sender is dropped with the request
        // and the response resolves to `ConnectionClosed`.
        let _ = self.requests.send(request);
        PendingResponse { rx }
    }

    /// Runs a command and waits for its rows.
    pub async fn execute(&self, command: Command) -> Result<Vec<Row>, ClientError> {
        self.submit(command, false).await
    }

    /// Runs a command ahead of everything not marked priority.
    pub async fn execute_prio(&self, command: Command) -> Result<Vec<Row>, ClientError> {
        self.submit(command, true).await
    }

    /// Stops or resumes sending queued commands.
    pub fn pause(&self, paused: bool) -> Result<(), ClientError> {
        self.send(Request::Pause(paused))
    }

    pub fn set_keep_alive(&self, enabled: bool) -> Result<(), ClientError> {
        self.send(Request::KeepAlive(enabled))
    }

    pub async fn state(&self) -> Result<State, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::State(tx))?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Subscribes to connection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueryEvent> {
        self.events.subscribe()
    }

    /// Returns whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Drops the transport. Queued commands stay queued unless the
    /// connection is configured to reject them on close.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Close(tx))?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    fn send(&self, request: Request) -> Result<(), ClientError> {
        self.requests
            .send(request)
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

struct Driver<C> {
    dispatcher: Dispatcher,
    connector: C,
    transport: Option<TransportHandle>,
    requests: mpsc::UnboundedReceiver<Request>,
    connected: Arc<AtomicBool>,
    connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    last_transport_error: Option<String>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self) {
        tracing::debug!("query driver started");
        loop {
            let deadline = self.dispatcher.next_deadline();
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                event = next_transport_event(&mut self.transport) => {
                    self.handle_transport(event);
                }
                _ = sleep_until(deadline) => {
                    self.dispatcher.poll_timers(Instant::now());
                }
            }
            self.flush();
            self.connected
                .store(self.dispatcher.is_connected(), Ordering::SeqCst);
        }

        tracing::debug!("all handles dropped, stopping query driver");
        self.transport = None;
        self.dispatcher.on_closed(None);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn handle_request(&mut self, request: Request) {
        let now = Instant::now();
        match request {
            Request::Connect(reply) => {
                if let Err(e) = self.dispatcher.begin_connect() {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.last_transport_error = None;
                self.connect_waiters.push(reply);
                self.transport = Some(self.connector.open());
            }
            Request::Submit {
                command,
                priority,
                reply,
            } => self.dispatcher.enqueue(command, priority, reply, now),
            Request::Pause(paused) => self.dispatcher.pause(paused, now),
            Request::KeepAlive(enabled) => self.dispatcher.set_keep_alive(enabled, now),
            Request::State(reply) => {
                let _ = reply.send(self.dispatcher.state());
            }
            Request::Close(reply) => {
                if self.transport.take().is_some() {
                    tracing::debug!("closing connection");
                    self.dispatcher.on_closed(None);
                    self.connected.store(false, Ordering::SeqCst);
                    self.fail_waiters(None);
                }
                let _ = reply.send(());
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::Connected => {
                self.dispatcher.on_connected(now);
                self.connected.store(true, Ordering::SeqCst);
            }
            TransportEvent::Line(line) => {
                self.dispatcher.on_line(&line, now);
                if matches!(self.dispatcher.state(), State::Idle | State::Busy) {
                    for waiter in self.connect_waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
            TransportEvent::Error(message) => {
                self.dispatcher.on_transport_error(message.clone());
                self.last_transport_error = Some(message);
            }
            TransportEvent::Closed(trailing) => {
                self.transport = None;
                self.dispatcher.on_closed(trailing.as_deref());
                self.connected.store(false, Ordering::SeqCst);
                self.fail_waiters(trailing.as_deref());
            }
        }
    }

    fn fail_waiters(&mut self, trailing: Option<&str>) {
        if self.connect_waiters.is_empty() {
            return;
        }
        let server_error = trailing
            .map(str::trim)
            .filter(|line| line.starts_with(ERROR_PREFIX))
            .map(QueryError::parse);
        for waiter in self.connect_waiters.drain(..) {
            let err = match (&server_error, &self.last_transport_error) {
                (Some(err), _) => ClientError::Query(err.clone()),
                (None, Some(message)) => ClientError::Transport(message.clone()),
                (None, None) => ClientError::ConnectionClosed,
            };
            let _ = waiter.send(Err(err));
        }
    }

    fn flush(&mut self) {
        while let Some(out) = self.dispatcher.poll_outgoing() {
            match &self.transport {
                Some(transport) => {
                    if transport.outgoing.send(out).is_err() {
                        tracing::debug!("transport gone, dropping write");
                    }
                }
                None => tracing::debug!("no transport, dropping write"),
            }
        }
    }
}

async fn next_transport_event(transport: &mut Option<TransportHandle>) -> TransportEvent {
    match transport {
        // A transport that vanishes without saying goodbye counts as closed.
        Some(handle) => handle
            .events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(None)),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Connection state machine.
//!
//! The dispatcher owns everything that decides *what* goes on the wire and
//! *when*: the pending queue, the single in-flight command, banner
//! skipping, notification routing, flood retries and keepalive. It performs
//! no I/O. The connection task feeds it transport events and the current
//! time, then drains [`Dispatcher::poll_outgoing`] into the transport and
//! sleeps until [`Dispatcher::next_deadline`].
//!
//! Every incoming line is classified in this order:
//!
//! 1. While banner lines remain, any line that is not an `error` line is
//!    swallowed. The last one makes the session ready.
//! 2. `error ...` finalizes the active command (or retries it on flood).
//! 3. `notify...` is published as an event.
//! 4. Anything else is response data for the active command.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::event::QueryEvent;
use crate::flood::FloodController;
use crate::queue::{CommandQueue, QueueItem, Reply};
use crate::transport::Outgoing;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tsquery_protocol::{LineKind, Notification, QueryError, BANNER_LINES, ERROR_PREFIX};

/// Dispatcher settings taken from [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub keep_alive: bool,
    pub keep_alive_interval: Duration,
    pub reject_pending_on_close: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for DispatcherConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            keep_alive: config.keep_alive,
            keep_alive_interval: config.keep_alive_interval(),
            reject_pending_on_close: config.reject_pending_on_close,
        }
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    /// Transport up, still reading the greeting.
    AwaitingBanner,
    /// Ready with nothing in flight.
    Idle,
    /// Ready with a command in flight.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct KeepAlive {
    enabled: bool,
    interval: Duration,
    last_send: Option<Instant>,
    deadline: Option<Instant>,
}

impl KeepAlive {
    /// Records a write and pushes the deadline a full interval out.
    fn touch(&mut self, now: Instant) {
        self.last_send = Some(now);
        if self.enabled {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Arms the timer for the remainder of the interval since the last write.
    fn arm(&mut self, now: Instant) {
        let since = self.last_send.unwrap_or(now);
        self.deadline = Some((since + self.interval).max(now));
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Sans-IO core of a query connection.
pub struct Dispatcher {
    queue: CommandQueue,
    active: Option<QueueItem>,
    ignore_lines: u8,
    last_event: Option<String>,
    phase: Phase,
    paused: bool,
    keep_alive: KeepAlive,
    flood: FloodController,
    outbox: VecDeque<Outgoing>,
    events: broadcast::Sender<QueryEvent>,
    reject_pending_on_close: bool,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, events: broadcast::Sender<QueryEvent>) -> Self {
        Self {
            queue: CommandQueue::new(),
            active: None,
            ignore_lines: 0,
            last_event: None,
            phase: Phase::Disconnected,
            paused: false,
            keep_alive: KeepAlive {
                enabled: config.keep_alive,
                interval: config.keep_alive_interval,
                last_send: None,
                deadline: None,
            },
            flood: FloodController::new(),
            outbox: VecDeque::new(),
            events,
            reject_pending_on_close: config.reject_pending_on_close,
        }
    }

    /// Prepares a fresh session.
    ///
    /// A command that was in flight when the previous transport died is
    /// reset and put back at the front of its tier.
    pub fn begin_connect(&mut self) -> Result<(), ClientError> {
        if self.phase == Phase::Connected {
            return Err(ClientError::AlreadyConnected);
        }

        if let Some(mut item) = self.active.take() {
            tracing::debug!("requeueing interrupted command {}", item.command.name());
            item.command.reset();
            self.queue.push_front(item);
        }

        self.flood.cancel();
        self.keep_alive.cancel();
        self.outbox.clear();
        self.ignore_lines = BANNER_LINES;
        self.last_event = None;
        self.phase = Phase::Connecting;
        Ok(())
    }

    /// Transport established; the banner is read next.
    pub fn on_connected(&mut self, now: Instant) {
        tracing::debug!("transport connected, waiting for {} banner lines", self.ignore_lines);
        self.phase = Phase::Connected;
        self.keep_alive.last_send = Some(now);
        if self.keep_alive.enabled {
            self.keep_alive.arm(now);
        }
        self.emit(QueryEvent::Connected);
    }

    /// Handles one received line.
    pub fn on_line(&mut self, line: &str, now: Instant) {
        let line = line.trim();
        tracing::trace!("<- {}", line);
        let kind = LineKind::of(line);

        if self.ignore_lines > 0 && kind != LineKind::Error {
            self.ignore_lines -= 1;
            if self.ignore_lines == 0 {
                tracing::debug!("banner consumed, session ready");
                self.emit(QueryEvent::Ready);
                self.advance(now);
            }
            return;
        }

        match kind {
            LineKind::Error => self.handle_terminator(line, now),
            LineKind::Notify => self.handle_notification(line),
            LineKind::Data => match self.active.as_mut() {
                Some(item) => item.command.set_response(line),
                None => tracing::debug!("dropping line with no active command: {}", line),
            },
        }
    }

    /// Reports a transport failure. The queue is left untouched.
    pub fn on_transport_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("transport error: {}", message);
        self.emit(QueryEvent::Error(message));
    }

    /// Handles the end of the transport.
    ///
    /// `trailing` is whatever partial line was still buffered; it becomes
    /// the close error when it is an `error` line.
    pub fn on_closed(&mut self, trailing: Option<&str>) {
        if self.phase == Phase::Disconnected {
            return;
        }
        self.phase = Phase::Disconnected;
        self.keep_alive.cancel();
        self.flood.cancel();
        self.outbox.clear();

        let error = trailing
            .map(str::trim)
            .filter(|line| line.starts_with(ERROR_PREFIX))
            .map(QueryError::parse);
        tracing::debug!(
            "connection closed ({} queued, active: {})",
            self.queue.len(),
            self.active.is_some()
        );

        if self.reject_pending_on_close {
            self.reject_pending();
        }
        self.emit(QueryEvent::Close(error));
    }

    /// Queues a command. It goes out once it reaches the head of the queue
    /// and the session is ready, unpaused and idle.
    pub fn enqueue(&mut self, command: Command, priority: bool, reply: Reply, now: Instant) {
        tracing::debug!(
            "queueing {}{}",
            command.name(),
            if priority { " (priority)" } else { "" }
        );
        self.queue.push(QueueItem::new(command, priority, reply));
        self.advance(now);
    }

    /// Stops or resumes draining the queue. The in-flight command is not
    /// affected.
    pub fn pause(&mut self, paused: bool, now: Instant) {
        self.paused = paused;
        if !paused {
            self.advance(now);
        }
    }

    pub fn set_keep_alive(&mut self, enabled: bool, now: Instant) {
        self.keep_alive.enabled = enabled;
        if enabled && self.phase == Phase::Connected {
            self.keep_alive.arm(now);
        } else {
            self.keep_alive.cancel();
        }
    }

    /// Fires due timers.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.flood.poll(now) {
            if let Some(item) = self.active.as_mut() {
                item.command.reset();
                let line = item.command.build();
                tracing::debug!("flood wait over, re-sending {}", item.command.name());
                self.send(line, now);
            }
        }

        if self.phase == Phase::Connected && self.keep_alive.is_due(now) {
            tracing::debug!("sending keepalive");
            self.outbox.push_back(Outgoing::KeepAlive);
            self.keep_alive.touch(now);
        }
    }

    /// Earliest instant at which [`Dispatcher::poll_timers`] has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.flood.deadline(), self.keep_alive.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Takes the next write for the transport.
    pub fn poll_outgoing(&mut self) -> Option<Outgoing> {
        self.outbox.pop_front()
    }

    /// Fails the in-flight command and everything queued.
    pub fn reject_pending(&mut self) {
        let mut rejected = 0;
        if let Some(item) = self.active.take() {
            item.reject(ClientError::ConnectionClosed);
            rejected += 1;
        }
        for item in self.queue.drain() {
            item.reject(ClientError::ConnectionClosed);
            rejected += 1;
        }
        self.flood.cancel();
        if rejected > 0 {
            tracing::debug!("rejected {} pending commands", rejected);
        }
    }

    pub fn state(&self) -> State {
        match self.phase {
            Phase::Disconnected => State::Disconnected,
            Phase::Connecting => State::Connecting,
            Phase::Connected if self.ignore_lines > 0 => State::AwaitingBanner,
            Phase::Connected if self.active.is_some() => State::Busy,
            Phase::Connected => State::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of commands waiting behind the in-flight one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_command(&self) -> Option<&Command> {
        self.active.as_ref().map(|item| &item.command)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.events.subscribe()
    }

    fn handle_terminator(&mut self, line: &str, now: Instant) {
        let Some(item) = self.active.as_mut() else {
            tracing::debug!("terminator with no active command: {}", line);
            return;
        };

        if !item.command.set_error(line) {
            return;
        }
        let flood = item.command.error().filter(|err| err.is_flood()).cloned();
        if let Some(err) = flood {
            let deadline = self.flood.schedule(now, &err);
            tracing::warn!(
                "server reports flooding ({}), retrying in {:?}",
                err,
                deadline.saturating_duration_since(now)
            );
            self.emit(QueryEvent::Flooding(err));
            return;
        }

        if let Some(item) = self.active.take() {
            tracing::debug!("{} finished", item.command.name());
            item.resolve();
        }
        self.advance(now);
    }

    fn handle_notification(&mut self, line: &str) {
        let Some(notification) = Notification::parse(line) else {
            return;
        };
        if notification.kind.is_double_fired() && self.last_event.as_deref() == Some(line) {
            tracing::trace!("suppressing repeated {}", notification.name());
            return;
        }
        self.last_event = Some(line.to_string());
        tracing::debug!("notify {}", notification.name());
        self.emit(QueryEvent::Notify(notification));
    }

    /// Sends the next live queued command if the session can take one.
    fn advance(&mut self, now: Instant) {
        if self.phase != Phase::Connected
            || self.ignore_lines > 0
            || self.paused
            || self.active.is_some()
        {
            return;
        }

        while let Some(item) = self.queue.pop() {
            if item.is_abandoned() {
                tracing::debug!("skipping {}, caller went away", item.command.name());
                continue;
            }
            let line = item.command.build();
            self.active = Some(item);
            self.send(line, now);
            return;
        }
    }

    fn send(&mut self, line: String, now: Instant) {
        tracing::trace!("-> {}", line);
        self.outbox.push_back(Outgoing::Line(line));
        self.keep_alive.touch(now);
    }

    fn emit(&self, event: QueryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

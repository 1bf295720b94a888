//! Pending command queue.

use crate::command::Command;
use crate::error::ClientError;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tsquery_protocol::Row;

/// Completion channel of a queued command.
pub type Reply = oneshot::Sender<Result<Vec<Row>, ClientError>>;

/// A command waiting for (or holding) the wire, plus its caller.
#[derive(Debug)]
pub struct QueueItem {
    pub command: Command,
    pub priority: bool,
    reply: Reply,
}

impl QueueItem {
    pub fn new(command: Command, priority: bool, reply: Reply) -> Self {
        Self {
            command,
            priority,
            reply,
        }
    }

    /// Returns whether the caller dropped its pending response.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Completes the caller with the command's outcome.
    pub fn resolve(self) {
        let outcome = self.command.into_result().map_err(ClientError::Query);
        // The caller may have stopped waiting.
        let _ = self.reply.send(outcome);
    }

    /// Fails the caller without a server response.
    pub fn reject(self, err: ClientError) {
        let _ = self.reply.send(Err(err));
    }
}

/// Two-tier FIFO: every priority item leaves before any normal item, and
/// each tier keeps submission order.
#[derive(Debug, Default)]
pub struct CommandQueue {
    priority: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item to the back of its tier.
    pub fn push(&mut self, item: QueueItem) {
        if item.priority {
            self.priority.push_back(item);
        } else {
            self.normal.push_back(item);
        }
    }

    /// Puts an item back at the front of its tier.
    pub fn push_front(&mut self, item: QueueItem) {
        if item.priority {
            self.priority.push_front(item);
        } else {
            self.normal.push_front(item);
        }
    }

    /// Takes the next item, priority tier first.
    pub fn pop(&mut self) -> Option<QueueItem> {
        self.priority.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.normal.is_empty()
    }

    /// Removes every item, priority tier first.
    pub fn drain(&mut self) -> impl Iterator<Item = QueueItem> + '_ {
        self.priority.drain(..).chain(self.normal.drain(..))
    }
}

//! Events broadcast by a query connection.

use tsquery_protocol::{Notification, QueryError};

/// Signals emitted by the dispatcher, in the order they happen.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// The transport is up; the banner has not been read yet.
    Connected,
    /// The banner was consumed and commands are being sent.
    Ready,
    /// An unsolicited server notification.
    Notify(Notification),
    /// The server throttled the active command; it will be re-sent.
    Flooding(QueryError),
    /// The transport closed, with the trailing error line if one was buffered.
    Close(Option<QueryError>),
    /// A transport-level failure.
    Error(String),
}

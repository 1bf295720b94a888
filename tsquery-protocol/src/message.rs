//! Line classification and notification types.

use crate::codec::parse_line;
use crate::value::Row;
use crate::{ERROR_PREFIX, NOTIFY_PREFIX};

/// What an incoming (trimmed) line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Terminator line ending the active command.
    Error,
    /// Unsolicited notification.
    Notify,
    /// Response data for the active command.
    Data,
}

impl LineKind {
    pub fn of(line: &str) -> Self {
        if line.starts_with(ERROR_PREFIX) {
            LineKind::Error
        } else if line.starts_with(NOTIFY_PREFIX) {
            LineKind::Notify
        } else {
            LineKind::Data
        }
    }
}

/// Known notification kinds, with a fallback for anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    ClientEnterView,
    ClientLeftView,
    ClientMoved,
    ServerEdited,
    ChannelEdited,
    ChannelCreated,
    ChannelMoved,
    ChannelDeleted,
    ChannelDescriptionChanged,
    ChannelPasswordChanged,
    TextMessage,
    TokenUsed,
    Other(String),
}

impl NotifyKind {
    /// Maps an event name (the part after `notify`) to its kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "cliententerview" => NotifyKind::ClientEnterView,
            "clientleftview" => NotifyKind::ClientLeftView,
            "clientmoved" => NotifyKind::ClientMoved,
            "serveredited" => NotifyKind::ServerEdited,
            "channeledited" => NotifyKind::ChannelEdited,
            "channelcreated" => NotifyKind::ChannelCreated,
            "channelmoved" => NotifyKind::ChannelMoved,
            "channeldeleted" => NotifyKind::ChannelDeleted,
            "channeldescriptionchanged" => NotifyKind::ChannelDescriptionChanged,
            "channelpasswordchanged" => NotifyKind::ChannelPasswordChanged,
            "textmessage" => NotifyKind::TextMessage,
            "tokenused" => NotifyKind::TokenUsed,
            other => NotifyKind::Other(other.to_string()),
        }
    }

    /// Returns the event name as it appears on the wire after `notify`.
    pub fn name(&self) -> &str {
        match self {
            NotifyKind::ClientEnterView => "cliententerview",
            NotifyKind::ClientLeftView => "clientleftview",
            NotifyKind::ClientMoved => "clientmoved",
            NotifyKind::ServerEdited => "serveredited",
            NotifyKind::ChannelEdited => "channeledited",
            NotifyKind::ChannelCreated => "channelcreated",
            NotifyKind::ChannelMoved => "channelmoved",
            NotifyKind::ChannelDeleted => "channeldeleted",
            NotifyKind::ChannelDescriptionChanged => "channeldescriptionchanged",
            NotifyKind::ChannelPasswordChanged => "channelpasswordchanged",
            NotifyKind::TextMessage => "textmessage",
            NotifyKind::TokenUsed => "tokenused",
            NotifyKind::Other(name) => name,
        }
    }

    /// Kinds the server is known to deliver twice in a row.
    pub fn is_double_fired(&self) -> bool {
        matches!(
            self,
            NotifyKind::ClientEnterView | NotifyKind::ClientLeftView | NotifyKind::ClientMoved
        )
    }
}

/// A parsed notification line.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub rows: Vec<Row>,
}

impl Notification {
    /// Parses `notify<name> k=v ...`. Returns `None` for other lines.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(NOTIFY_PREFIX)?;
        let (name, body) = match rest.split_once(' ') {
            Some((name, body)) => (name, body),
            None => (rest, ""),
        };
        Some(Self {
            kind: NotifyKind::from_name(name),
            rows: parse_line(body),
        })
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Returns the first row, which holds the event fields.
    pub fn row(&self) -> Option<&Row> {
        self.rows.first()
    }
}

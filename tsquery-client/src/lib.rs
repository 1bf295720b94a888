//! # tsquery-client
//!
//! Async client library for the ServerQuery protocol.
//!
//! This crate provides:
//! - A single-flight command dispatcher with a two-tier priority queue
//! - Banner skipping, notification broadcast and duplicate suppression
//! - Transparent flood-control retries and idle keepalives
//! - A pluggable line transport with a TCP implementation
//! - A high-level client that restores its session after reconnecting

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod flood;
pub mod queue;
pub mod transport;

pub use client::Client;
pub use command::{Command, ResponseParser};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{PendingResponse, Query};
pub use dispatcher::{Dispatcher, DispatcherConfig, State};
pub use error::ClientError;
pub use event::QueryEvent;
pub use transport::{Connector, Outgoing, TcpConnector, TransportEvent, TransportHandle};

pub use tsquery_protocol::{Notification, NotifyKind, OptionValue, Options, QueryError, Row, Value};

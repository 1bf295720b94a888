//! # tsquery-protocol
//!
//! Wire codec for the ServerQuery text protocol.
//!
//! This crate provides:
//! - Escaping and unescaping of protocol tokens
//! - `key=value` tokenizing into ordered rows with per-key typed values
//! - Command line building from options, multi-option groups and flags
//! - Error, notification and line classification types
//! - A newline-delimited line decoder for byte-stream transports

pub mod codec;
pub mod error;
pub mod escape;
pub mod keys;
pub mod message;
pub mod types;
pub mod value;

pub use codec::{build_command, parse_line, LineDecoder};
pub use error::{ProtocolError, QueryError};
pub use escape::{escape, unescape};
pub use keys::{to_camel_case, to_snake_case};
pub use message::{LineKind, Notification, NotifyKind};
pub use types::ValueKind;
pub use value::{OptionValue, Options, Row, Value};

/// Prefix of the terminator line that ends every command response.
pub const ERROR_PREFIX: &str = "error";

/// Prefix of unsolicited notification lines.
pub const NOTIFY_PREFIX: &str = "notify";

/// Error id the server uses for "too many commands, retry later".
pub const FLOOD_ERROR_ID: &str = "524";

/// Number of greeting lines the server sends before accepting commands.
pub const BANNER_LINES: u8 = 2;

/// Payload written to keep an idle session open.
pub const KEEPALIVE_PAYLOAD: &str = " ";

/// Default raw query port.
pub const DEFAULT_QUERY_PORT: u16 = 10011;

/// Default maximum accepted line length (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

//! Protocol error types and the server error row.

use crate::codec::parse_line;
use crate::value::{Row, Value};
use crate::{ERROR_PREFIX, FLOOD_ERROR_ID};
use std::fmt;
use thiserror::Error;

/// Errors raised while framing lines off the wire.
///
/// Key/value parsing itself never fails.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },
}

/// The status row carried by a terminator line (`error id=.. msg=..`).
///
/// `id` is normalised to its decimal string form, so a server that sends
/// `0`, `00` or a numeric `0` all read as `"0"`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    pub id: String,
    pub msg: String,
    pub extra_msg: Option<String>,
    pub failed_permid: Option<i64>,
}

impl QueryError {
    pub fn new(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: normalize_id(id.into()),
            msg: msg.into(),
            extra_msg: None,
            failed_permid: None,
        }
    }

    pub fn with_extra_msg(mut self, extra: impl Into<String>) -> Self {
        self.extra_msg = Some(extra.into());
        self
    }

    pub fn with_failed_permid(mut self, permid: i64) -> Self {
        self.failed_permid = Some(permid);
        self
    }

    /// Parses a terminator line. The `error` prefix is optional.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let body = line.strip_prefix(ERROR_PREFIX).unwrap_or(line);
        let row = parse_line(body).into_iter().next().unwrap_or_default();
        Self::from_row(&row)
    }

    /// Builds the error from an already decoded row.
    pub fn from_row(row: &Row) -> Self {
        let text = |key: &str| match row.get(key) {
            Some(Value::None) | None => None,
            Some(value) => Some(value.to_string()),
        };

        Self {
            id: normalize_id(text("id").unwrap_or_default()),
            msg: text("msg").unwrap_or_default(),
            extra_msg: text("extraMsg"),
            failed_permid: row.get("failedPermid").and_then(Value::as_i64),
        }
    }

    /// Returns whether the row reports success (`id=0`).
    pub fn is_success(&self) -> bool {
        self.id == "0"
    }

    /// Returns whether the server is asking the client to slow down.
    pub fn is_flood(&self) -> bool {
        self.id == FLOOD_ERROR_ID
    }

    /// Human-readable message: `msg[, extra_msg][, failed on permid N]`.
    pub fn message(&self) -> String {
        let mut message = self.msg.clone();
        if let Some(ref extra) = self.extra_msg {
            message.push_str(", ");
            message.push_str(extra);
        }
        if let Some(permid) = self.failed_permid {
            message.push_str(&format!(", failed on permid {}", permid));
        }
        message
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for QueryError {}

fn normalize_id(id: String) -> String {
    match id.trim().parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_row() {
        let err = QueryError::parse("error id=0 msg=ok");
        assert_eq!(err.id, "0");
        assert_eq!(err.msg, "ok");
        assert!(err.is_success());
        assert!(!err.is_flood());
    }

    #[test]
    fn test_parse_error_row() {
        let err = QueryError::parse("error id=512 msg=invalid\\sserverID");
        assert_eq!(err.id, "512");
        assert_eq!(err.msg, "invalid serverID");
        assert_eq!(err.message(), "invalid serverID");
        assert_eq!(err.to_string(), "invalid serverID");
        assert!(!err.is_success());
    }

    #[test]
    fn test_parse_extra_fields() {
        let err = QueryError::parse(
            "error id=2568 msg=insufficient\\sclient\\spermissions failed_permid=4 extra_msg=see\\slog",
        );
        assert_eq!(err.failed_permid, Some(4));
        assert_eq!(err.extra_msg.as_deref(), Some("see log"));
        assert_eq!(
            err.message(),
            "insufficient client permissions, see log, failed on permid 4"
        );
    }

    #[test]
    fn test_zero_padded_id_is_success() {
        assert!(QueryError::parse("error id=00 msg=ok").is_success());
        assert!(QueryError::new("0", "ok").is_success());
    }

    #[test]
    fn test_flood_id() {
        let err = QueryError::parse(
            "error id=524 msg=client\\sis\\sflooding extra_msg=please\\swait\\s10\\sseconds",
        );
        assert!(err.is_flood());
        assert_eq!(err.message(), "client is flooding, please wait 10 seconds");
    }

    #[test]
    fn test_missing_id_is_not_success() {
        let err = QueryError::parse("error msg=weird");
        assert_eq!(err.id, "");
        assert!(!err.is_success());
    }

    #[test]
    fn test_builder() {
        let err = QueryError::new("2568", "denied")
            .with_extra_msg("nope")
            .with_failed_permid(17);
        assert_eq!(err.message(), "denied, nope, failed on permid 17");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::LineTooLong { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));
        assert!(ProtocolError::InvalidUtf8.to_string().contains("UTF-8"));
    }
}

//! Line codec: response parsing, command building and line framing.

use crate::error::ProtocolError;
use crate::escape::{escape, unescape};
use crate::keys::{to_camel_case, to_snake_case};
use crate::types::{kind_of, ValueKind};
use crate::value::{OptionValue, Options, Row, Value};
use crate::MAX_LINE_LENGTH;
use bytes::BytesMut;

/// Decodes a raw (still escaped) value according to the kind of its key.
///
/// Never fails: a value that does not fit its declared kind is returned as
/// a string.
pub fn parse_value(key: &str, raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::None;
    };
    let text = unescape(raw);
    match kind_of(key) {
        ValueKind::String => Value::Str(text),
        ValueKind::Number => parse_number(&text).unwrap_or(Value::Str(text)),
        ValueKind::Boolean => match text.parse::<i64>() {
            Ok(n) => Value::Bool(n != 0),
            Err(_) => Value::Str(text),
        },
        ValueKind::StringArray => {
            if text.is_empty() {
                return Value::StrList(Vec::new());
            }
            Value::StrList(text.split(',').map(|s| s.trim().to_string()).collect())
        }
        ValueKind::NumberArray => {
            if text.is_empty() {
                return Value::IntList(Vec::new());
            }
            let parsed: Option<Vec<i64>> = text
                .split(',')
                .map(|s| match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
                    _ => None,
                })
                .collect();
            parsed.map_or(Value::Str(text), Value::IntList)
        }
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::Int(n));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(Value::Float(f)),
        _ => None,
    }
}

/// Splits a token at its first `=`. A bare token has no value.
pub fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (token, None),
    }
}

/// Parses one space-separated group into a row with camel-case keys.
pub fn parse_group(group: &str) -> Row {
    let mut row = Row::new();
    for token in group.split(' ').filter(|t| !t.is_empty()) {
        let (key, raw) = split_token(token);
        let key = unescape(key);
        let value = parse_value(&key, raw);
        row.insert(to_camel_case(&key), value);
    }
    row
}

/// Parses a data line into its ordered rows, one per `|`-separated group.
///
/// Rows are returned as sent; first-row fields are not merged into later
/// rows (see [`apply_first_row_defaults`]).
pub fn parse_line(line: &str) -> Vec<Row> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    line.split('|').map(parse_group).collect()
}

/// Keeps the whole line as a single row under the `raw` key.
///
/// Used for responses that are opaque blobs rather than key/value data.
pub fn parse_raw(line: &str) -> Vec<Row> {
    let mut row = Row::new();
    row.insert("raw".to_string(), Value::Str(line.to_string()));
    vec![row]
}

/// Copies fields of the first row into every later row that lacks them.
///
/// Some list responses only send shared fields in the first group.
pub fn apply_first_row_defaults(rows: Vec<Row>) -> Vec<Row> {
    let mut iter = rows.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut out = vec![first.clone()];
    for row in iter {
        let mut merged = first.clone();
        merged.extend(row);
        out.push(merged);
    }
    out
}

fn build_pair(key: &str, value: &OptionValue) -> Option<String> {
    let key = escape(&to_snake_case(key));
    match value {
        OptionValue::List(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| item.to_wire())
                .map(|v| format!("{}={}", key, escape(&v)))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("|"))
            }
        }
        scalar => scalar.to_wire().map(|v| format!("{}={}", key, escape(&v))),
    }
}

/// Builds the space-separated `key=value` text of one option group.
pub fn build_group(options: &Options) -> String {
    options
        .iter()
        .filter_map(|(key, value)| build_pair(key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds a complete command line (without the trailing newline).
///
/// Layout: `name[ flags][ options][|group]...`. When the primary options
/// are empty the first multi-option group is joined with a space instead.
pub fn build_command(
    name: &str,
    options: &Options,
    multi_options: &[Options],
    flags: &[String],
) -> String {
    let mut line = escape(name.trim());

    for flag in flags {
        line.push(' ');
        line.push_str(&escape(flag));
    }

    let mut has_group = false;
    let primary = build_group(options);
    if !primary.is_empty() {
        line.push(' ');
        line.push_str(&primary);
        has_group = true;
    }

    for group in multi_options {
        let text = build_group(group);
        if text.is_empty() {
            continue;
        }
        line.push(if has_group { '|' } else { ' ' });
        line.push_str(&text);
        has_group = true;
    }

    line
}

/// Newline-delimited line decoder for byte-stream transports.
///
/// Holds back any trailing partial line until more data arrives.
pub struct LineDecoder {
    buffer: BytesMut,
    max_line_length: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line_length,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete line without its `\n`, if one is buffered.
    pub fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = self.buffer.split_to(pos + 1);
                let text =
                    std::str::from_utf8(&line[..pos]).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Some(text.to_string()))
            }
            None if self.buffer.len() > self.max_line_length => {
                let size = self.buffer.len();
                self.buffer.clear();
                Err(ProtocolError::LineTooLong {
                    size,
                    max: self.max_line_length,
                })
            }
            None => Ok(None),
        }
    }

    /// Takes whatever partial line is left, e.g. when the stream closes.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

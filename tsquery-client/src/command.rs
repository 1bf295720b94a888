//! A single ServerQuery request/response unit.

use tsquery_protocol::codec::{build_command, parse_line};
use tsquery_protocol::{OptionValue, Options, QueryError, Row};

/// Turns one response line into rows.
pub type ResponseParser = fn(&str) -> Vec<Row>;

/// A command and the response it accumulates.
///
/// Response lines are appended with [`Command::set_response`] until the
/// terminator line is handed to [`Command::set_error`], which freezes the
/// outcome. Lines arriving after that are dropped.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    options: Options,
    multi_options: Vec<Options>,
    flags: Vec<String>,
    parser: ResponseParser,
    response: Vec<Row>,
    error: Option<QueryError>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            options: Options::new(),
            multi_options: Vec::new(),
            flags: Vec::new(),
            parser: parse_line,
            response: Vec::new(),
            error: None,
        }
    }

    pub fn with_command(mut self, name: impl Into<String>) -> Self {
        self.name = name.into().trim().to_string();
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Adds a single option to the primary group.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn with_multi_options(mut self, groups: Vec<Options>) -> Self {
        self.multi_options = groups;
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Replaces the response line parser.
    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the wire line (without the trailing newline).
    pub fn build(&self) -> String {
        build_command(&self.name, &self.options, &self.multi_options, &self.flags)
    }

    /// Appends the rows of one response line.
    pub fn set_response(&mut self, line: &str) {
        if self.is_finalized() {
            tracing::warn!("dropping response line for finalized command {}", self.name);
            return;
        }
        self.response.extend((self.parser)(line));
    }

    /// Records the terminator line. Returns `false` if the command was
    /// already finalized, in which case the line is ignored.
    pub fn set_error(&mut self, line: &str) -> bool {
        if self.is_finalized() {
            tracing::warn!("ignoring second terminator for command {}", self.name);
            return false;
        }
        self.error = Some(QueryError::parse(line));
        true
    }

    /// Returns whether the terminator line has been seen.
    pub fn is_finalized(&self) -> bool {
        self.error.is_some()
    }

    /// Returns whether the terminator reported a non-zero id.
    ///
    /// A command still waiting for its terminator has no error.
    pub fn has_error(&self) -> bool {
        self.error.as_ref().is_some_and(|err| !err.is_success())
    }

    /// Returns the server error, or `None` if the command succeeded or is
    /// still pending.
    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref().filter(|err| !err.is_success())
    }

    /// Returns the accumulated rows in arrival order.
    pub fn response(&self) -> &[Row] {
        &self.response
    }

    /// Consumes the command and yields its outcome.
    pub fn into_result(self) -> Result<Vec<Row>, QueryError> {
        match self.error {
            Some(err) if !err.is_success() => Err(err),
            _ => Ok(self.response),
        }
    }

    /// Clears the response and error so the command can be sent again.
    pub fn reset(&mut self) {
        self.response.clear();
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsquery_protocol::codec::parse_raw;
    use tsquery_protocol::Value;

    #[test]
    fn test_build_trims_name() {
        let cmd = Command::new("  version \n");
        assert_eq!(cmd.name(), "version");
        assert_eq!(cmd.build(), "version");
    }

    #[test]
    fn test_build_is_idempotent() {
        let cmd = Command::new("clientlist")
            .with_flags(["-uid", "-away"])
            .with_option("cid", 4);
        assert_eq!(cmd.build(), cmd.build());
        assert_eq!(cmd.build(), "clientlist -uid -away cid=4");
    }

    #[test]
    fn test_builder_chain() {
        let cmd = Command::new("placeholder")
            .with_command("channeladdperm")
            .with_options(Options::new().with("cid", 1))
            .with_multi_options(vec![
                Options::new().with("permid", 1).with("permvalue", 2),
                Options::new().with("permid", 3).with("permvalue", 4),
            ])
            .with_flag("-continueonerror");
        assert_eq!(
            cmd.build(),
            "channeladdperm -continueonerror cid=1|permid=1 permvalue=2|permid=3 permvalue=4"
        );
    }

    #[test]
    fn test_success_outcome() {
        let mut cmd = Command::new("version");
        cmd.set_response("version=3.13.6 build=1234 platform=Linux");
        assert!(!cmd.has_error());
        assert!(cmd.set_error("error id=0 msg=ok"));
        assert!(!cmd.has_error());
        assert!(cmd.error().is_none());
        assert_eq!(cmd.response().len(), 1);
        assert_eq!(cmd.response()[0]["build"], Value::Int(1234));
    }

    #[test]
    fn test_pending_command_has_no_error() {
        let cmd = Command::new("version");
        assert!(!cmd.has_error());
        assert!(cmd.error().is_none());
        assert!(cmd.response().is_empty());
        assert!(!cmd.is_finalized());
    }

    #[test]
    fn test_error_outcome() {
        let mut cmd = Command::new("use");
        cmd.set_error("error id=1024 msg=invalid\\sserverID");
        assert!(cmd.has_error());
        let err = cmd.error().unwrap();
        assert_eq!(err.id, "1024");
        assert_eq!(err.message(), "invalid serverID");
        assert!(cmd.into_result().is_err());
    }

    #[test]
    fn test_error_id_boundary() {
        let mut ok = Command::new("a");
        ok.set_error("error id=0 msg=ok");
        assert!(!ok.has_error());

        let mut failed = Command::new("a");
        failed.set_error("error id=1 msg=undefined\\serror");
        assert!(failed.has_error());
    }

    #[test]
    fn test_outcome_is_write_once() {
        let mut cmd = Command::new("whoami");
        cmd.set_response("client_id=1");
        cmd.set_error("error id=0 msg=ok");
        cmd.set_response("client_id=2");
        assert!(!cmd.set_error("error id=5 msg=late"));
        assert!(!cmd.has_error());
        assert_eq!(cmd.response().len(), 1);
    }

    #[test]
    fn test_multiple_response_lines_accumulate() {
        let mut cmd = Command::new("channellist");
        cmd.set_response("cid=1 channel_name=Lobby|cid=2 channel_name=Support");
        cmd.set_response("cid=3 channel_name=AFK");
        cmd.set_error("error id=0 msg=ok");
        let rows = cmd.into_result().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["channelName"], Value::Str("AFK".into()));
    }

    #[test]
    fn test_custom_parser() {
        let mut cmd = Command::new("serversnapshotcreate").with_parser(parse_raw);
        cmd.set_response("hash=abc|channel_name=x");
        assert_eq!(cmd.response()[0]["raw"], Value::Str("hash=abc|channel_name=x".into()));
    }

    #[test]
    fn test_reset() {
        let mut cmd = Command::new("version");
        cmd.set_response("version=1");
        cmd.set_error("error id=524 msg=flood");
        cmd.reset();
        assert!(!cmd.is_finalized());
        assert!(cmd.response().is_empty());
        assert_eq!(cmd.build(), "version");
    }
}

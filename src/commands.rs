//! Command execution.

use crate::Commands;
use colored::Colorize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tsquery_client::{Client, Command, Options, QueryEvent, Row};
use tsquery_protocol::codec::split_token;
use tsquery_protocol::unescape;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::Watch { .. } => unreachable!(),

        Commands::Exec { line } => {
            let line = line.join(" ");
            let command = parse_input(&line).ok_or("empty command line")?;
            let rows = client.execute(command).await?;
            Ok(format_rows(&rows))
        }

        Commands::Version => {
            let row = client.version().await?;
            Ok(format_rows(&[row]))
        }

        Commands::Whoami => {
            let row = client.whoami().await?;
            Ok(format_rows(&[row]))
        }

        Commands::Servers => Ok(format_rows(&client.server_list().await?)),

        Commands::Channels => Ok(format_rows(&client.channel_list().await?)),

        Commands::Clients { uid, away } => {
            let mut flags = Vec::new();
            if uid {
                flags.push("-uid");
            }
            if away {
                flags.push("-away");
            }
            Ok(format_rows(&client.client_list(&flags).await?))
        }
    }
}

/// Registers for the given notification classes and prints every
/// notification as a JSON line until Ctrl+C or disconnect.
pub async fn watch(client: &Client, events: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut event_rx = client.events();
    for event in events {
        // Channel notifications need a channel id; 0 means all channels.
        let id = (event == "channel").then_some(0);
        client.register_events(event, id).await?;
    }

    eprintln!("{} {}", "Watching".green(), events.join(", ").cyan());
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(line) = format_event(&event) {
                            println!("{}", line);
                        }
                        if let QueryEvent::Close(_) = event {
                            eprintln!("{}", "Connection closed".red());
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                    }
                    Err(RecvError::Closed) => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }

    Ok(())
}

/// Turns a typed command line into a [`Command`].
///
/// Tokens starting with `-` (and other bare words) become flags,
/// `key=value` tokens become options, and `|` starts a new option group.
/// Values are taken in wire form (`\s` for spaces) and unescaped, since the
/// builder escapes them again.
pub fn parse_input(line: &str) -> Option<Command> {
    let mut groups = line.trim().split('|');
    let mut tokens = groups.next()?.split_whitespace();
    let mut command = Command::new(tokens.next()?);

    let mut options = Options::new();
    for token in tokens {
        match split_token(token) {
            (key, Some(value)) => options.insert(key, unescape(value)),
            (flag, None) => command = command.with_flag(flag),
        }
    }

    let multi_options = groups
        .map(|group| {
            group
                .split_whitespace()
                .filter_map(|token| match split_token(token) {
                    (key, Some(value)) => Some((key.to_string(), unescape(value))),
                    (_, None) => None,
                })
                .collect::<Options>()
        })
        .filter(|group| !group.is_empty())
        .collect();

    Some(command.with_options(options).with_multi_options(multi_options))
}

/// Pretty-prints rows as JSON.
pub fn format_rows(rows: &[Row]) -> String {
    if rows.iter().all(|row| row.is_empty()) {
        return "OK".green().to_string();
    }
    serde_json::to_string_pretty(rows).unwrap_or_else(|e| format!("<unprintable rows: {}>", e))
}

/// Renders an event as one JSON line. Returns `None` for events that only
/// matter to the connection itself.
pub fn format_event(event: &QueryEvent) -> Option<String> {
    let value = match event {
        QueryEvent::Notify(notification) => json!({
            "event": notification.name(),
            "data": notification.rows,
        }),
        QueryEvent::Flooding(err) => json!({ "flooding": err.message() }),
        QueryEvent::Close(err) => json!({ "close": err.as_ref().map(|e| e.message()) }),
        QueryEvent::Error(message) => json!({ "error": message }),
        QueryEvent::Connected | QueryEvent::Ready => return None,
    };
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsquery_client::{Notification, Value};

    #[test]
    fn test_parse_input_flags_and_options() {
        let command = parse_input("clientlist -uid -away").unwrap();
        assert_eq!(command.build(), "clientlist -uid -away");

        let command = parse_input("  use sid=1  ").unwrap();
        assert_eq!(command.build(), "use sid=1");
    }

    #[test]
    fn test_parse_input_reescapes_values() {
        let command =
            parse_input("sendtextmessage targetmode=3 target=1 msg=hello\\sworld").unwrap();
        assert_eq!(
            command.build(),
            "sendtextmessage targetmode=3 target=1 msg=hello\\sworld"
        );
    }

    #[test]
    fn test_parse_input_groups() {
        let line = "channeladdperm cid=4 permsid=a permvalue=1|permsid=b permvalue=2";
        let command = parse_input(line).unwrap();
        assert_eq!(
            command.build(),
            "channeladdperm cid=4 permsid=a permvalue=1|permsid=b permvalue=2"
        );
    }

    #[test]
    fn test_parse_input_empty() {
        assert!(parse_input("").is_none());
        assert!(parse_input("   ").is_none());
    }

    #[test]
    fn test_format_rows_json() {
        let mut row = Row::new();
        row.insert("clid".into(), Value::Int(1));
        row.insert("clientNickname".into(), Value::Str("serveradmin".into()));
        let text = format_rows(&[row]);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["clid"], 1);
        assert_eq!(parsed[0]["clientNickname"], "serveradmin");
    }

    #[test]
    fn test_format_event() {
        let notification =
            Notification::parse("notifytextmessage targetmode=3 msg=hi invokerid=7").unwrap();
        let line = format_event(&QueryEvent::Notify(notification)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "textmessage");
        assert_eq!(parsed["data"][0]["invokerid"], 7);

        assert!(format_event(&QueryEvent::Ready).is_none());
    }
}

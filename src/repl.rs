//! Interactive REPL.

use crate::commands::{format_event, format_rows, parse_input};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tsquery_client::{Client, QueryEvent};

const HELP_TEXT: &str = r#"
Lines are sent to the server as raw ServerQuery commands, e.g.
  version
  clientlist -uid -away
  use sid=1
  sendtextmessage targetmode=3 target=1 msg=hello\sworld

Values use wire escaping (\s for space, \p for |).

Local commands:
  help                          Show this help
  watch <class> [id]            Register for notifications (server, channel, textserver, ...)
  pause / resume                Hold or release the command queue
  reconnect                     Reconnect and restore login and server selection
  quit, exit                    Send quit and leave the REPL
"#;

const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// How long the REPL waits for a response before giving up on a command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(client: Client, addr: String) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "tsquery CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    // Print notifications as they arrive
    let mut events = client.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let QueryEvent::Close(_) = event {
                        println!("\n{}", "Connection closed (type 'reconnect').".yellow());
                    } else if let Some(line) = format_event(&event) {
                        println!("\n{} {}", "event".magenta(), line);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    println!("{}: lagged {} events", "Warning".yellow(), n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    client.open().await?;
    println!("{}", "Connected!".green());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".tsquery_history"))
        .unwrap_or_else(|_| ".tsquery_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "tsquery>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    if client.is_connected() {
        let _ = client.quit().await;
    }
    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "watch" => {
            let Some(class) = args.first() else {
                return Ok(Some("Usage: watch <class> [id]".to_string()));
            };
            let id = args.get(1).map(|s| s.parse()).transpose()?;
            client.register_events(class, id).await?;
            Ok(Some(format!("{} {}", "Watching".green(), class.cyan())))
        }

        "pause" => {
            client.query().pause(true)?;
            Ok(Some("Queue paused".yellow().to_string()))
        }

        "resume" => {
            client.query().pause(false)?;
            Ok(Some("Queue resumed".green().to_string()))
        }

        "reconnect" => {
            if client.is_connected() {
                client.close().await?;
            }
            client.reconnect(RECONNECT_ATTEMPTS, RECONNECT_DELAY).await?;
            Ok(Some("Reconnected".green().to_string()))
        }

        _ => {
            let command = parse_input(line).ok_or("empty command line")?;
            // A command that times out while still queued is dropped from
            // the queue along with its future.
            let rows = tokio::time::timeout(COMMAND_TIMEOUT, client.execute(command))
                .await
                .map_err(|_| "timed out waiting for a response")??;
            Ok(Some(format_rows(&rows)))
        }
    }
}

//! tsquery - Command-line interface for ServerQuery servers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tsquery_client::{Client, ConnectionConfig};

#[derive(Parser)]
#[command(name = "tsquery")]
#[command(about = "Command-line interface for ServerQuery administration")]
#[command(version)]
pub struct Cli {
    /// Server host
    #[arg(short = 'H', long, env = "TSQUERY_HOST")]
    host: Option<String>,

    /// Query port
    #[arg(short, long, env = "TSQUERY_QUERY_PORT")]
    port: Option<u16>,

    /// Query login name
    #[arg(short, long, env = "TSQUERY_USERNAME")]
    username: Option<String>,

    /// Query login password
    #[arg(long, env = "TSQUERY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Select the virtual server with this voice port
    #[arg(long, env = "TSQUERY_SERVER_PORT")]
    server_port: Option<u16>,

    /// Select the virtual server with this id
    #[arg(long, env = "TSQUERY_SERVER_ID", conflicts_with = "server_port")]
    sid: Option<u32>,

    /// Nickname to use once a server is selected
    #[arg(short, long, env = "TSQUERY_NICKNAME")]
    nickname: Option<String>,

    /// YAML configuration file
    #[arg(short, long, env = "TSQUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Disable idle keepalives
    #[arg(long)]
    no_keepalive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Run a raw command line, e.g. `clientlist -uid`
    Exec {
        /// Command line (joined with spaces)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },

    /// Show server version
    Version,

    /// Show the query client's own session
    Whoami,

    /// List virtual servers
    Servers,

    /// List channels of the selected server
    Channels,

    /// List clients of the selected server
    Clients {
        /// Include unique identifiers
        #[arg(long)]
        uid: bool,

        /// Include away status
        #[arg(long)]
        away: bool,
    },

    /// Print notifications until interrupted
    Watch {
        /// Notification classes to register
        #[arg(long, value_delimiter = ',', default_value = "server,textserver")]
        events: Vec<String>,
    },
}

impl Cli {
    /// Layers command-line arguments over the configuration file.
    fn connection_config(&self) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::from_file(path)?,
            None => ConnectionConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.query_port = port;
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config = config.with_login(username, password);
        }
        if let Some(port) = self.server_port {
            config = config.with_server_port(port);
        }
        if let Some(sid) = self.sid {
            config = config.with_server_id(sid);
        }
        if let Some(nickname) = &self.nickname {
            config = config.with_nickname(nickname);
        }
        if self.no_keepalive {
            config = config.with_keep_alive(false);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.connection_config()?;
    let addr = config.addr();
    tracing::debug!("using query interface at {}", addr);
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, addr).await?;
        }
        Some(Commands::Watch { events }) => {
            client.open().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;
            commands::watch(&client, &events).await?;
            let _ = client.quit().await;
            client.close().await?;
        }
        Some(cmd) => {
            client.open().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            match commands::execute(&client, cmd).await {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }

            let _ = client.quit().await;
            client.close().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_layers_over_defaults() {
        let cli = Cli::parse_from([
            "tsquery",
            "-H",
            "voice.example.com",
            "--username",
            "serveradmin",
            "--password",
            "pw",
            "--sid",
            "2",
            "--no-keepalive",
            "version",
        ]);
        let config = cli.connection_config().unwrap();
        assert_eq!(config.addr(), "voice.example.com:10011");
        assert_eq!(config.username.as_deref(), Some("serveradmin"));
        assert_eq!(config.server_id, Some(2));
        assert!(!config.keep_alive);
        assert!(matches!(cli.command, Some(Commands::Version)));
    }

    #[test]
    fn test_exec_keeps_hyphen_flags() {
        let cli = Cli::parse_from(["tsquery", "exec", "clientlist", "-uid", "-away"]);
        match cli.command {
            Some(Commands::Exec { line }) => assert_eq!(line.join(" "), "clientlist -uid -away"),
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_watch_default_events() {
        let cli = Cli::parse_from(["tsquery", "watch"]);
        match cli.command {
            Some(Commands::Watch { events }) => assert_eq!(events, vec!["server", "textserver"]),
            _ => panic!("expected watch"),
        }
    }
}

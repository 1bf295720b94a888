//! High-level client API.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::{PendingResponse, Query};
use crate::error::ClientError;
use crate::event::QueryEvent;
use crate::transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tsquery_protocol::codec::parse_raw;
use tsquery_protocol::{Options, Row};

/// Virtual server selection made with `use`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Port(u16),
    Sid(u32),
}

/// Session state that must be restored after a reconnect.
#[derive(Debug, Clone, Default)]
struct Context {
    login: Option<(String, String)>,
    selection: Option<Selection>,
    nickname: Option<String>,
    registrations: Vec<(String, Option<u32>)>,
}

impl Context {
    /// Commands that rebuild this context on a fresh session, in order.
    fn commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some((username, password)) = &self.login {
            commands.push(login_command(username, password));
        }
        match self.selection {
            Some(Selection::Port(port)) => {
                commands.push(Command::new("use").with_option("port", port))
            }
            Some(Selection::Sid(sid)) => commands.push(Command::new("use").with_option("sid", sid)),
            None => {}
        }
        if let Some(nickname) = &self.nickname {
            commands.push(Command::new("clientupdate").with_option("client_nickname", nickname));
        }
        for (event, id) in &self.registrations {
            commands.push(register_command(event, *id));
        }
        commands
    }
}

fn login_command(username: &str, password: &str) -> Command {
    Command::new("login")
        .with_option("client_login_name", username)
        .with_option("client_login_password", password)
}

fn register_command(event: &str, id: Option<u32>) -> Command {
    Command::new("servernotifyregister")
        .with_option("event", event)
        .with_option("id", id)
}

fn first_row(rows: Vec<Row>) -> Row {
    rows.into_iter().next().unwrap_or_default()
}

/// High-level client for a ServerQuery interface.
///
/// Remembers login, server selection, nickname and notification
/// registrations so [`Client::reconnect`] can restore them.
#[derive(Clone)]
pub struct Client {
    query: Query,
    config: ConnectionConfig,
    context: Arc<Mutex<Context>>,
}

impl Client {
    /// Creates a client over TCP (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let query = Query::new(&config);
        Self::from_query(query, config)
    }

    /// Creates a client over a custom transport.
    pub fn with_connector<C: Connector>(config: ConnectionConfig, connector: C) -> Self {
        let query = Query::with_connector(&config, connector);
        Self::from_query(query, config)
    }

    fn from_query(query: Query, config: ConnectionConfig) -> Self {
        Self {
            query,
            config,
            context: Arc::new(Mutex::new(Context::default())),
        }
    }

    /// Creates a client and connects it.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let client = Self::new(config);
        client.open().await?;
        Ok(client)
    }

    /// Connects and applies the login, server selection and nickname from
    /// the configuration.
    pub async fn open(&self) -> Result<(), ClientError> {
        self.config.validate()?;
        self.query.connect().await?;

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            self.login(username, password).await?;
        }
        if let Some(port) = self.config.server_port {
            self.use_port(port).await?;
        } else if let Some(sid) = self.config.server_id {
            self.use_sid(sid).await?;
        }
        if let Some(nickname) = &self.config.nickname {
            self.set_nickname(nickname).await?;
        }
        Ok(())
    }

    /// Returns whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.query.is_connected()
    }

    /// Drops the connection without sending `quit`.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.query.close().await
    }

    /// Returns the underlying query handle.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Subscribes to connection events and notifications.
    pub fn events(&self) -> broadcast::Receiver<QueryEvent> {
        self.query.subscribe_events()
    }

    // =========================================================================
    // Raw commands
    // =========================================================================

    pub fn submit(&self, command: Command, priority: bool) -> PendingResponse {
        self.query.submit(command, priority)
    }

    pub async fn execute(&self, command: Command) -> Result<Vec<Row>, ClientError> {
        self.query.execute(command).await
    }

    pub async fn execute_prio(&self, command: Command) -> Result<Vec<Row>, ClientError> {
        self.query.execute_prio(command).await
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Authenticates the query client.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.execute(login_command(username, password)).await?;
        self.context.lock().await.login = Some((username.to_string(), password.to_string()));
        Ok(())
    }

    /// Drops the login. The server also deselects the virtual server.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.execute(Command::new("logout")).await?;
        let mut context = self.context.lock().await;
        context.login = None;
        context.selection = None;
        context.nickname = None;
        context.registrations.clear();
        Ok(())
    }

    /// Selects a virtual server by voice port.
    pub async fn use_port(&self, port: u16) -> Result<(), ClientError> {
        self.execute(Command::new("use").with_option("port", port)).await?;
        self.context.lock().await.selection = Some(Selection::Port(port));
        Ok(())
    }

    /// Selects a virtual server by id.
    pub async fn use_sid(&self, sid: u32) -> Result<(), ClientError> {
        self.execute(Command::new("use").with_option("sid", sid)).await?;
        self.context.lock().await.selection = Some(Selection::Sid(sid));
        Ok(())
    }

    /// Sends `quit`. The server closes the connection afterwards.
    pub async fn quit(&self) -> Result<(), ClientError> {
        self.execute(Command::new("quit")).await?;
        *self.context.lock().await = Context::default();
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn version(&self) -> Result<Row, ClientError> {
        self.execute(Command::new("version")).await.map(first_row)
    }

    pub async fn whoami(&self) -> Result<Row, ClientError> {
        self.execute(Command::new("whoami")).await.map(first_row)
    }

    pub async fn server_list(&self) -> Result<Vec<Row>, ClientError> {
        self.execute(Command::new("serverlist")).await
    }

    pub async fn channel_list(&self) -> Result<Vec<Row>, ClientError> {
        self.execute(Command::new("channellist")).await
    }

    /// Lists connected clients. `flags` are passed through, e.g. `-uid`.
    pub async fn client_list(&self, flags: &[&str]) -> Result<Vec<Row>, ClientError> {
        self.execute(Command::new("clientlist").with_flags(flags.iter().copied())).await
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Changes properties of the query client itself.
    pub async fn client_update(&self, options: Options) -> Result<(), ClientError> {
        self.execute(Command::new("clientupdate").with_options(options)).await?;
        Ok(())
    }

    /// Sets the query client's nickname and keeps it across reconnects.
    pub async fn set_nickname(&self, nickname: &str) -> Result<(), ClientError> {
        self.client_update(Options::new().with("client_nickname", nickname)).await?;
        self.context.lock().await.nickname = Some(nickname.to_string());
        Ok(())
    }

    /// Subscribes to a notification class (`server`, `channel`,
    /// `textserver`, `textchannel`, `textprivate`, `tokenused`). `id` is
    /// the channel id for `channel`.
    pub async fn register_events(&self, event: &str, id: Option<u32>) -> Result<(), ClientError> {
        self.execute(register_command(event, id)).await?;
        let mut context = self.context.lock().await;
        let entry = (event.to_string(), id);
        if !context.registrations.contains(&entry) {
            context.registrations.push(entry);
        }
        Ok(())
    }

    /// Sends a text message. `target_mode` is 1 (client), 2 (channel) or
    /// 3 (server).
    pub async fn send_text_message(
        &self,
        target_mode: u8,
        target: u32,
        message: &str,
    ) -> Result<(), ClientError> {
        let command = Command::new("sendtextmessage")
            .with_option("targetmode", target_mode)
            .with_option("target", target)
            .with_option("msg", message);
        self.execute(command).await?;
        Ok(())
    }

    /// Kicks clients from their channel (`reason_id` 4) or the server (5).
    pub async fn client_kick(
        &self,
        clids: &[u32],
        reason_id: u8,
        reason_msg: Option<&str>,
    ) -> Result<(), ClientError> {
        let command = Command::new("clientkick")
            .with_option("clid", clids.to_vec())
            .with_option("reasonid", reason_id)
            .with_option("reasonmsg", reason_msg);
        self.execute(command).await?;
        Ok(())
    }

    /// Grants several permissions on a channel in one command.
    pub async fn channel_add_perms(
        &self,
        cid: u32,
        perms: &[(&str, i64)],
    ) -> Result<(), ClientError> {
        let groups = perms
            .iter()
            .map(|(perm, value)| Options::new().with("permsid", *perm).with("permvalue", *value))
            .collect();
        let command = Command::new("channeladdperm")
            .with_option("cid", cid)
            .with_multi_options(groups);
        self.execute(command).await?;
        Ok(())
    }

    /// Creates a server snapshot. The snapshot line is returned verbatim.
    pub async fn snapshot_create(&self) -> Result<String, ClientError> {
        let rows = self.execute(Command::new("serversnapshotcreate").with_parser(parse_raw)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("raw").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    // =========================================================================
    // Reconnect
    // =========================================================================

    /// Reconnects and restores the session context.
    ///
    /// The queue is paused while connecting so the context commands, sent
    /// as priority commands, run before anything that was already queued.
    pub async fn reconnect(&self, attempts: u32, delay: Duration) -> Result<(), ClientError> {
        let mut last_err = ClientError::NotConnected;

        for attempt in 1..=attempts.max(1) {
            self.query.pause(true)?;
            match self.query.connect().await {
                Ok(()) => {
                    let commands = self.context.lock().await.commands();
                    tracing::debug!("reconnected, restoring {} context commands", commands.len());
                    let pending: Vec<PendingResponse> = commands
                        .into_iter()
                        .map(|command| self.query.submit(command, true))
                        .collect();
                    self.query.pause(false)?;
                    for response in pending {
                        response.await?;
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!("reconnect attempt {} failed: {}", attempt, e);
                    last_err = e;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    last_err = e;
                    break;
                }
            }
        }

        self.query.pause(false)?;
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{test_config, MockConnector, MockServer};
    use crate::transport::TransportEvent;
    use tsquery_protocol::Value;

    const OK: &str = "error id=0 msg=ok";

    async fn expect(server: &mut MockServer, line: &str) {
        assert_eq!(server.next_line().await, line);
        server.reply(&[OK]);
    }

    #[tokio::test]
    async fn test_open_applies_config_context() {
        let connector = MockConnector::default();
        let config = test_config()
            .with_login("serveradmin", "secret pass")
            .with_server_port(9987)
            .with_nickname("bot");
        let client = Client::with_connector(config, connector.clone());

        let open = tokio::spawn({
            let client = client.clone();
            async move { client.open().await }
        });

        // The session only exists once the connect request was handled.
        while connector.opened() == 0 {
            tokio::task::yield_now().await;
        }
        let mut server = connector.take_session();
        expect(
            &mut server,
            "login client_login_name=serveradmin client_login_password=secret\\spass",
        )
        .await;
        expect(&mut server, "use port=9987").await;
        expect(&mut server, "clientupdate client_nickname=bot").await;
        open.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let connector = MockConnector::default();
        let mut config = test_config();
        config.username = Some("serveradmin".to_string());
        let client = Client::with_connector(config, connector.clone());

        let err = client.open().await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(!err.is_retryable());
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_version_returns_first_row() {
        let connector = MockConnector::default();
        let client = Client::with_connector(test_config(), connector.clone());
        client.open().await.unwrap();
        let mut server = connector.take_session();

        let version = tokio::spawn({
            let client = client.clone();
            async move { client.version().await }
        });
        assert_eq!(server.next_line().await, "version");
        server.reply(&["version=3.13.6 build=1623234157 platform=Linux", OK]);
        let row = version.await.unwrap().unwrap();
        assert_eq!(row["version"], Value::Str("3.13.6".into()));
    }

    #[tokio::test]
    async fn test_wire_shapes() {
        let connector = MockConnector::default();
        let client = Client::with_connector(test_config(), connector.clone());
        client.open().await.unwrap();
        let mut server = connector.take_session();

        let calls = tokio::spawn({
            let client = client.clone();
            async move {
                client.client_kick(&[1, 2], 5, Some("bye now")).await?;
                client
                    .channel_add_perms(
                        10,
                        &[("i_channel_needed_join_power", 50), ("b_channel_join_permanent", 1)],
                    )
                    .await?;
                client.send_text_message(3, 1, "hello | world").await?;
                client.client_list(&["-uid", "-away"]).await
            }
        });

        expect(&mut server, "clientkick clid=1|clid=2 reasonid=5 reasonmsg=bye\\snow").await;
        expect(
            &mut server,
            "channeladdperm cid=10|permsid=i_channel_needed_join_power permvalue=50|permsid=b_channel_join_permanent permvalue=1",
        )
        .await;
        expect(&mut server, "sendtextmessage targetmode=3 target=1 msg=hello\\s\\p\\sworld").await;
        assert_eq!(server.next_line().await, "clientlist -uid -away");
        server.reply(&["clid=1 client_nickname=a|clid=2 client_nickname=b", OK]);

        let rows = calls.await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_raw() {
        let connector = MockConnector::default();
        let client = Client::with_connector(test_config(), connector.clone());
        client.open().await.unwrap();
        let mut server = connector.take_session();

        let snapshot = tokio::spawn({
            let client = client.clone();
            async move { client.snapshot_create().await }
        });
        assert_eq!(server.next_line().await, "serversnapshotcreate");
        server.reply(&["hash=abc|channel_name=Lobby cid=1", OK]);
        assert_eq!(
            snapshot.await.unwrap().unwrap(),
            "hash=abc|channel_name=Lobby cid=1"
        );
    }

    #[tokio::test]
    async fn test_reconnect_restores_context_first() {
        let connector = MockConnector::default();
        let client = Client::with_connector(test_config(), connector.clone());
        client.open().await.unwrap();
        let mut first = connector.take_session();

        let setup = tokio::spawn({
            let client = client.clone();
            async move {
                client.login("serveradmin", "pw").await?;
                client.use_sid(1).await?;
                client.register_events("textserver", None).await?;
                client.register_events("textserver", None).await
            }
        });
        expect(&mut first, "login client_login_name=serveradmin client_login_password=pw").await;
        expect(&mut first, "use sid=1").await;
        expect(&mut first, "servernotifyregister event=textserver").await;
        expect(&mut first, "servernotifyregister event=textserver").await;
        setup.await.unwrap().unwrap();

        first.close(None);
        while client.is_connected() {
            tokio::task::yield_now().await;
        }
        let queued = client.submit(Command::new("serverinfo"), false);

        let reconnect = tokio::spawn({
            let client = client.clone();
            async move { client.reconnect(3, Duration::from_millis(10)).await }
        });
        while connector.opened() == 0 {
            tokio::task::yield_now().await;
        }
        let mut second = connector.take_session();
        expect(&mut second, "login client_login_name=serveradmin client_login_password=pw").await;
        expect(&mut second, "use sid=1").await;
        expect(&mut second, "servernotifyregister event=textserver").await;
        reconnect.await.unwrap().unwrap();

        assert_eq!(second.next_line().await, "serverinfo");
        second.reply(&["virtualserver_name=Test", OK]);
        assert!(queued.await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_on_server_rejection() {
        let connector = MockConnector::with_script(vec![
            TransportEvent::Connected,
            TransportEvent::Closed(Some("error id=3329 msg=banned".into())),
        ]);
        let client = Client::with_connector(test_config(), connector.clone());
        let err = client.reconnect(5, Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(err.query_error().unwrap().id, "3329");
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_retries_transport_failures() {
        let connector = MockConnector::with_script(vec![
            TransportEvent::Error("connection refused".into()),
            TransportEvent::Closed(None),
        ]);
        let client = Client::with_connector(test_config(), connector.clone());
        let err = client.reconnect(3, Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(connector.opened(), 3);
    }

    #[test]
    fn test_context_commands_order() {
        let context = Context {
            login: Some(("admin".into(), "pw".into())),
            selection: Some(Selection::Port(9987)),
            nickname: Some("bot".into()),
            registrations: vec![("channel".into(), Some(4)), ("textprivate".into(), None)],
        };
        let lines: Vec<String> = context.commands().iter().map(Command::build).collect();
        assert_eq!(
            lines,
            vec![
                "login client_login_name=admin client_login_password=pw",
                "use port=9987",
                "clientupdate client_nickname=bot",
                "servernotifyregister event=channel id=4",
                "servernotifyregister event=textprivate",
            ]
        );
    }
}

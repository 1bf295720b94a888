//! Line transports.
//!
//! A transport runs as its own task and talks to the connection over two
//! channels: [`Outgoing`] writes in, [`TransportEvent`]s out. The TCP
//! transport is the default; anything that can produce the same events
//! (an SSH channel, a test double) plugs in through [`Connector`].

use crate::config::ConnectionConfig;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tsquery_protocol::{LineDecoder, KEEPALIVE_PAYLOAD};

/// A write request for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A command line, sent with a trailing newline.
    Line(String),
    /// The keepalive payload.
    KeepAlive,
}

impl Outgoing {
    /// Returns the bytes to put on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Outgoing::Line(line) => format!("{}\n", line),
            Outgoing::KeepAlive => format!("{}\n", KEEPALIVE_PAYLOAD),
        }
    }
}

/// What a transport reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// One complete line, without its newline.
    Line(String),
    Error(String),
    /// The stream ended. Carries the unterminated tail of the read buffer.
    Closed(Option<String>),
}

/// Connection-side ends of a transport's channels.
///
/// Dropping the handle (or just `outgoing`) shuts the transport down.
#[derive(Debug)]
pub struct TransportHandle {
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportHandle {
    /// Creates a connected pair of channel ends: the handle for the
    /// connection and the peer ends for the transport task.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<Outgoing>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: out_tx,
                events: ev_rx,
            },
            out_rx,
            ev_tx,
        )
    }
}

/// Opens transports. Called once per connect attempt, from inside the
/// runtime.
pub trait Connector: Send + Sync + 'static {
    fn open(&self) -> TransportHandle;
}

/// Plain TCP transport for the raw query port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
    read_buffer_size: usize,
    max_line_length: usize,
}

impl TcpConnector {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            addr: config.addr(),
            connect_timeout: config.connect_timeout(),
            read_buffer_size: config.read_buffer_size,
            max_line_length: config.max_line_length,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    fn open(&self) -> TransportHandle {
        let (handle, outgoing, events) = TransportHandle::pair();
        tokio::spawn(run_tcp(self.clone(), outgoing, events));
        handle
    }
}

async fn run_tcp(
    settings: TcpConnector,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    tracing::debug!("connecting to {}...", settings.addr);

    let stream = match tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect(&settings.addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!("connection failed: {}", e);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
        Err(_) => {
            tracing::debug!("connection timeout");
            let _ = events.send(TransportEvent::Error(format!(
                "connect to {} timed out",
                settings.addr
            )));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
    };

    stream.set_nodelay(true).ok();
    if events.send(TransportEvent::Connected).is_err() {
        return;
    }
    tracing::debug!("TCP connected to {}", settings.addr);

    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = LineDecoder::with_max_line_length(settings.max_line_length);
    let mut buf = vec![0u8; settings.read_buffer_size];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("server closed the connection");
                    break;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.next_line() {
                            Ok(Some(line)) => {
                                let _ = events.send(TransportEvent::Line(line));
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!("discarding undecodable input: {}", e);
                                let _ = events.send(TransportEvent::Error(e.to_string()));
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("read failed: {}", e);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            },
            out = outgoing.recv() => match out {
                Some(out) => {
                    if let Err(e) = writer.write_all(out.to_wire().as_bytes()).await {
                        tracing::debug!("write failed: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    tracing::debug!("shutting down writer");
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }

    let _ = events.send(TransportEvent::Closed(decoder.take_remainder()));
}

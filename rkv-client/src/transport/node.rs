//! # Single-Node Connection
//!
//! Purpose: Own one TCP socket to one store node, speak RESP2 over it, and
//! publish connect progress while the retry policy drives reconnects.
//!
//! ## Design Principles
//! 1. **One Exchange at a Time**: The socket sits behind an async mutex so a
//!    request/response pair (or a whole `MULTI..EXEC`) owns it exclusively.
//! 2. **Buffer Reuse**: Read and write buffers live on the socket.
//! 3. **Drop on Failure**: A socket that failed mid-exchange is discarded; the
//!    next command reconnects once. Failed commands are never replayed.
//! 4. **Deterministic Close**: After `shutdown` every call fails with `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use rkv_common::{
    ConnectionError, ConnectionOptions, ConnectionTarget, ProtocolError, RespValue,
    RespDecoder, RkvError, RkvResult,
};

use super::{reconnect, Command, LifecycleEvent, Transport};
use crate::retry::RetryPolicy;

/// Per-socket setup commands sent right after the TCP connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSetup {
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    /// Sent with `CLIENT SETNAME`.
    pub client_name: Option<String>,
}

impl NodeSetup {
    /// Derives setup commands from connection options.
    pub fn from_options(options: &ConnectionOptions) -> Self {
        let client_name = options.connection_name.clone();
        match &options.target {
            ConnectionTarget::Default(node) => NodeSetup {
                username: node.username.clone(),
                password: node.password.clone(),
                db: node.db,
                client_name,
            },
            ConnectionTarget::Cluster(cluster) => NodeSetup {
                username: cluster.username.clone(),
                password: cluster.password.clone(),
                db: None,
                client_name,
            },
        }
    }

    fn commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some(password) = &self.password {
            let mut auth = Command::new("AUTH");
            if let Some(username) = &self.username {
                auth = auth.arg(username);
            }
            commands.push(auth.arg(password));
        }
        if let Some(name) = &self.client_name {
            commands.push(Command::new("CLIENT").arg("SETNAME").arg(name));
        }
        if let Some(db) = self.db {
            commands.push(Command::new("SELECT").arg(db.to_string()));
        }
        commands
    }
}

/// Connection to a single store node.
#[derive(Debug)]
pub struct NodeConnection {
    addr: String,
    setup: NodeSetup,
    socket: Mutex<Option<Socket>>,
    closed: AtomicBool,
}

impl NodeConnection {
    /// Creates an unconnected handle; the first command connects it.
    pub fn new(addr: impl Into<String>, setup: NodeSetup) -> Self {
        NodeConnection {
            addr: addr.into(),
            setup,
            socket: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates the handle and starts its reconnect loop on the runtime.
    ///
    /// The returned receiver sees every lifecycle event of the loop. Dropping
    /// it detaches the subscriber; the loop keeps running until it connects or
    /// the policy stops.
    pub fn open(
        addr: impl Into<String>,
        setup: NodeSetup,
        policy: RetryPolicy,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let conn = Arc::new(Self::new(addr, setup));
        let (events, subscription) = mpsc::unbounded_channel();

        let name = conn.addr.clone();
        let driver = Arc::clone(&conn);
        tokio::spawn(async move {
            reconnect::drive(&name, &policy, &events, || {
                let conn = Arc::clone(&driver);
                async move { conn.connect_once().await }
            })
            .await;
        });

        (conn, subscription)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Performs one connect + handshake and installs the socket.
    pub(crate) async fn connect_once(&self) -> RkvResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        let socket = Socket::connect(&self.addr, &self.setup).await?;

        let mut guard = self.socket.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        *guard = Some(socket);
        Ok(())
    }

    async fn round_trip(&self, commands: &[Command]) -> RkvResult<Vec<RespValue>> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        let mut guard = self.socket.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        let mut socket = match guard.take() {
            Some(socket) => socket,
            None => {
                debug!(addr = %self.addr, "no live socket, connecting before command");
                Socket::connect(&self.addr, &self.setup).await?
            }
        };

        match socket.round_trip(commands).await {
            Ok(replies) => {
                *guard = Some(socket);
                Ok(replies)
            }
            Err(err) => {
                debug!(addr = %self.addr, error = %err, "dropping broken socket");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Transport for NodeConnection {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        let mut replies = self.round_trip(std::slice::from_ref(&command)).await?;
        replies
            .pop()
            .ok_or_else(|| ProtocolError::UnexpectedEof.into())
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        let mut batch = Vec::with_capacity(commands.len() + 2);
        batch.push(Command::new("MULTI"));
        batch.extend(commands);
        batch.push(Command::new("EXEC"));

        let mut replies = self.round_trip(&batch).await?;
        replies
            .pop()
            .ok_or_else(|| ProtocolError::UnexpectedEof.into())
    }

    async fn shutdown(&self) -> RkvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut guard = self.socket.lock().await;
        if let Some(mut socket) = guard.take() {
            // QUIT is best effort; the socket is dropped either way.
            if let Err(err) = socket.round_trip(&[Command::new("QUIT")]).await {
                debug!(addr = %self.addr, error = %err, "QUIT failed during shutdown");
            }
            let _ = socket.stream.shutdown().await;
        }
        debug!(addr = %self.addr, "connection closed");
        Ok(())
    }
}

/// Live TCP socket with reusable buffers.
#[derive(Debug)]
struct Socket {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    decoder: RespDecoder,
}

impl Socket {
    async fn connect(addr: &str, setup: &NodeSetup) -> RkvResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| ConnectionError::from_connect(addr, err))?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut socket = Socket {
            stream,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: Vec::with_capacity(256),
            decoder: RespDecoder::new(),
        };
        socket.handshake(setup).await?;
        Ok(socket)
    }

    async fn handshake(&mut self, setup: &NodeSetup) -> RkvResult<()> {
        let commands = setup.commands();
        if commands.is_empty() {
            return Ok(());
        }

        for reply in self.round_trip(&commands).await? {
            if let Some(message) = reply.error_message() {
                return Err(RkvError::Operation(message));
            }
        }
        Ok(())
    }

    /// Writes all commands in one flush, then reads one reply per command.
    async fn round_trip(&mut self, commands: &[Command]) -> RkvResult<Vec<RespValue>> {
        self.write_buf.clear();
        for command in commands {
            command.encode_into(&mut self.write_buf);
        }
        self.stream.write_all(&self.write_buf).await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    async fn read_reply(&mut self) -> RkvResult<RespValue> {
        loop {
            if let Some(value) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(value);
            }
            let bytes = self.stream.read_buf(&mut self.read_buf).await?;
            if bytes == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
        }
    }
}

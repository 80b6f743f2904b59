//! # Error Taxonomy
//!
//! Purpose: One error vocabulary shared by the codec, the transports and the
//! typed client so callers can match on failure categories.
//!
//! ## Categories
//! 1. **Connection**: raised while establishing or using a socket. Refused
//!    connections are the only kind the establisher counts against its budget.
//! 2. **Protocol**: RESP framing violations or replies of the wrong shape.
//! 3. **Serialization**: a value could not be encoded to, or decoded from, JSON.
//! 4. **Operation**: the store rejected one command (`-ERR ...`).

use std::io;

use thiserror::Error;

/// Result type used across the workspace.
pub type RkvResult<T> = Result<T, RkvError>;

/// Top-level error surfaced to callers.
#[derive(Error, Debug)]
pub enum RkvError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store answered a single command with an error reply.
    #[error("operation error: {0}")]
    Operation(String),

    /// `EXEC` returned nil or the transaction was discarded at queue time.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl RkvError {
    /// Returns true when the underlying cause is a refused TCP connect.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            RkvError::Connection(err) => err.is_refused(),
            RkvError::Io(err) => err.kind() == io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Returns true when the connection was closed by `shutdown`.
    pub fn is_closed(&self) -> bool {
        matches!(self, RkvError::Connection(ConnectionError::Closed))
    }
}

/// Connection-related errors.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connect ECONNREFUSED {addr}: {source}")]
    Refused { addr: String, source: io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Failed { addr: String, source: io::Error },

    /// The transport's retry policy stopped before the connection became ready.
    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },

    #[error("connection is closed")]
    Closed,

    #[error("no startup nodes could be reached")]
    NoStartupNodes,
}

impl ConnectionError {
    /// Classifies a connect failure, keeping `ECONNREFUSED` distinct.
    pub fn from_connect(addr: impl Into<String>, source: io::Error) -> Self {
        let addr = addr.into();
        if source.kind() == io::ErrorKind::ConnectionRefused {
            ConnectionError::Refused { addr, source }
        } else {
            ConnectionError::Failed { addr, source }
        }
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, ConnectionError::Refused { .. })
    }
}

/// RESP2 framing and reply-shape errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid RESP type byte: {0:#04x}")]
    InvalidType(u8),

    #[error("invalid integer in frame")]
    InvalidInteger,

    #[error("missing CRLF terminator")]
    MissingCrlf,

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("connection closed mid-frame")]
    UnexpectedEof,
}

impl ProtocolError {
    pub fn unexpected(expected: impl Into<String>, actual: impl std::fmt::Debug) -> Self {
        ProtocolError::UnexpectedResponse {
            expected: expected.into(),
            actual: format!("{:?}", actual),
        }
    }
}

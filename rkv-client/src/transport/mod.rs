//! # Transport Seam
//!
//! Purpose: Describe what the typed client needs from a connection so the
//! same read/write surface runs over a single node, a cluster, one cluster
//! member, or an in-process fake in tests.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `KvClient` is generic over `Transport`.
//! 2. **Borrowed Views**: `&T` and `Arc<T>` are transports too, so facades can
//!    borrow a member connection without owning it.
//! 3. **Lifecycle Events**: Transports report connect progress on a channel
//!    instead of invoking callbacks; the establisher decides the outcome.

mod command;
mod node;
pub(crate) mod reconnect;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rkv_common::{RespValue, RkvError, RkvResult};

pub use command::Command;
pub use node::{NodeConnection, NodeSetup};

/// Connect-progress signal published by a transport's reconnect loop.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// The transport is connected and accepting commands.
    Ready,
    /// A connect attempt failed.
    Error(RkvError),
    /// The retry policy granted another attempt.
    Reconnecting { attempt: u32, delay: Duration },
    /// The retry policy stopped; no further attempts will be made.
    End,
}

/// Request/response access to a key-value store.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one command and returns its reply.
    ///
    /// Error replies come back as `Ok(RespValue::Error(..))`; only transport
    /// failures are `Err`.
    async fn execute(&self, command: Command) -> RkvResult<RespValue>;

    /// Sends `MULTI`, the commands and `EXEC` without interleaving other
    /// traffic, and returns the reply to `EXEC`.
    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue>;

    /// Closes the connection. Idempotent; later calls fail with `Closed`.
    async fn shutdown(&self) -> RkvResult<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        (**self).execute(command).await
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        (**self).transaction(commands).await
    }

    async fn shutdown(&self) -> RkvResult<()> {
        (**self).shutdown().await
    }
}

#[async_trait]
impl<'a, T: Transport + ?Sized> Transport for &'a T {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        (**self).execute(command).await
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        (**self).transaction(commands).await
    }

    async fn shutdown(&self) -> RkvResult<()> {
        (**self).shutdown().await
    }
}

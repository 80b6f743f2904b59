//! # Typed Client API
//!
//! Purpose: Expose get/set/mget/mset/del/health-check over any transport,
//! storing values as JSON text.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides RESP framing and JSON encoding.
//! 2. **Explicit Context**: The connection is a value owned (or borrowed) by
//!    the client; there is no process-wide handle.
//! 3. **Fail Fast**: Undecodable payloads and error replies surface as errors;
//!    nothing is retried here.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use rkv_common::{ProtocolError, RespValue, RkvError, RkvResult};

use crate::transaction::{BatchOutcome, TransactionBatch};
use crate::transport::{Command, NodeConnection, Transport};

/// Reply `check_health` expects to `PING`.
pub const HEALTH_REPLY: &str = "PONG";

/// Typed client over a single-node connection.
pub type RedisClient = KvClient<std::sync::Arc<NodeConnection>>;

/// Typed key-value client.
#[derive(Debug, Clone)]
pub struct KvClient<T> {
    transport: T,
}

impl<T: Transport> KvClient<T> {
    pub fn new(transport: T) -> Self {
        KvClient { transport }
    }

    /// Borrows the underlying transport for raw commands.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches and decodes a value. Returns `Ok(None)` when the key is missing.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> RkvResult<Option<V>> {
        match self.transport.execute(Command::new("GET").key(key)).await? {
            RespValue::Bulk(None) => Ok(None),
            RespValue::Bulk(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            reply => Err(unexpected("bulk string", reply)),
        }
    }

    /// Stores a value, with a millisecond-precision expiry when `ttl` is set.
    ///
    /// Returns the store acknowledgement, normally `"OK"`.
    pub async fn set<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> RkvResult<String> {
        let payload = serde_json::to_vec(value)?;
        let reply = self.transport.execute(set_command(key, payload, ttl)).await?;
        match reply {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => {
                Ok(reply.as_text().unwrap_or_default())
            }
            reply => Err(unexpected("simple string", reply)),
        }
    }

    /// Fetches several keys in one round trip.
    ///
    /// The result lists every requested key in request order; missing keys map
    /// to `None`.
    pub async fn mget<V: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> RkvResult<Vec<(String, Option<V>)>> {
        let raw = self.mget_raw(keys).await?;
        let mut result = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(raw) {
            let decoded = match value {
                Some(data) => Some(serde_json::from_slice(&data)?),
                None => None,
            };
            result.push((key.to_string(), decoded));
        }
        Ok(result)
    }

    /// Fetches several keys and decodes them into one schema type.
    ///
    /// The requested keys become the fields of a JSON object (missing keys are
    /// `null`), which is then deserialized into `S`.
    pub async fn mget_into<S: DeserializeOwned>(&self, keys: &[&str]) -> RkvResult<S> {
        let raw = self.mget_raw(keys).await?;
        let mut object = serde_json::Map::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(raw) {
            let decoded = match value {
                Some(data) => serde_json::from_slice(&data)?,
                None => serde_json::Value::Null,
            };
            object.insert(key.to_string(), decoded);
        }
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }

    async fn mget_raw(&self, keys: &[&str]) -> RkvResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let command = keys.iter().fold(Command::new("MGET"), |cmd, key| cmd.key(key));
        let items = match self.transport.execute(command).await? {
            RespValue::Array(Some(items)) => items,
            RespValue::Array(None) => return Ok(vec![None; keys.len()]),
            reply => return Err(unexpected("array", reply)),
        };
        if items.len() != keys.len() {
            return Err(ProtocolError::UnexpectedResponse {
                expected: format!("{} values", keys.len()),
                actual: format!("{} values", items.len()),
            }
            .into());
        }

        items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(value) => Ok(value),
                reply => Err(unexpected("bulk string", reply)),
            })
            .collect()
    }

    /// Writes all pairs atomically with one shared optional TTL.
    ///
    /// See [`TransactionBatch::exec`] for the outcome shape.
    pub async fn mset<V: Serialize>(
        &self,
        pairs: &[(&str, V)],
        ttl: Option<Duration>,
    ) -> RkvResult<BatchOutcome> {
        let mut batch = TransactionBatch::new(ttl);
        for (key, value) in pairs {
            batch.set(key, value)?;
        }
        batch.exec(&self.transport).await
    }

    /// Deletes keys and returns how many existed.
    pub async fn del(&self, keys: &[&str]) -> RkvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let command = keys.iter().fold(Command::new("DEL"), |cmd, key| cmd.key(key));
        match self.transport.execute(command).await? {
            RespValue::Integer(count) => Ok(count.max(0) as u64),
            reply => Err(unexpected("integer", reply)),
        }
    }

    /// Sends `PING` and returns the raw reply text.
    pub async fn ping(&self) -> RkvResult<String> {
        let reply = self.transport.execute(Command::new("PING")).await?;
        match reply.as_text() {
            Some(text) => Ok(text),
            None => Err(unexpected("simple string", reply)),
        }
    }

    /// Liveness probe: true only when `PING` answers exactly `PONG`.
    pub async fn check_health(&self) -> bool {
        matches!(self.ping().await, Ok(reply) if reply == HEALTH_REPLY)
    }

    /// Closes the underlying connection. Idempotent.
    pub async fn shutdown(&self) -> RkvResult<()> {
        self.transport.shutdown().await
    }
}

/// Builds `SET key payload [PX ms]`.
pub(crate) fn set_command(key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Command {
    let command = Command::new("SET").key(key).arg(payload);
    match ttl {
        Some(ttl) => command.arg("PX").arg(ttl.as_millis().to_string()),
        None => command,
    }
}

/// Maps error replies to `Operation` and anything else to a shape mismatch.
pub(crate) fn unexpected(expected: &str, reply: RespValue) -> RkvError {
    match reply.error_message() {
        Some(message) => RkvError::Operation(message),
        None => ProtocolError::unexpected(expected, reply).into(),
    }
}

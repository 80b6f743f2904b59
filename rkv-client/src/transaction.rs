//! # Atomic Multi-Key Writes
//!
//! Purpose: Collect `SET` operations that share one optional TTL and submit
//! them as a single `MULTI..EXEC` transaction.
//!
//! ## Outcome Shape
//! - The transaction as a whole either commits or is aborted; an aborted
//!   transaction is `Err(TransactionAborted)` and none of its writes are
//!   visible.
//! - A committed transaction yields one entry per operation in submission
//!   order. An entry is `Err(Operation)` when the store rejected that single
//!   command at execution time.

use std::time::Duration;

use serde::Serialize;

use rkv_common::{RespValue, RkvError, RkvResult};

use crate::client::{set_command, unexpected};
use crate::transport::{Command, Transport};

/// Per-operation results of a committed transaction, in submission order.
pub type BatchOutcome = Vec<RkvResult<RespValue>>;

/// Ordered writes sharing one TTL.
#[derive(Debug, Clone, Default)]
pub struct TransactionBatch {
    ttl: Option<Duration>,
    commands: Vec<Command>,
}

impl TransactionBatch {
    pub fn new(ttl: Option<Duration>) -> Self {
        TransactionBatch {
            ttl,
            commands: Vec::new(),
        }
    }

    /// Queues a write. Values are JSON-encoded immediately.
    pub fn set<V: Serialize + ?Sized>(&mut self, key: &str, value: &V) -> RkvResult<&mut Self> {
        let payload = serde_json::to_vec(value)?;
        self.commands.push(set_command(key, payload, self.ttl));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Submits the batch as one transaction.
    ///
    /// **Logic**:
    /// 1. An empty batch completes without contacting the store.
    /// 2. A nil `EXEC` reply or an `EXECABORT` error aborts the whole batch.
    /// 3. Otherwise each element of the `EXEC` array maps to one outcome.
    pub async fn exec<T: Transport + ?Sized>(self, transport: &T) -> RkvResult<BatchOutcome> {
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }

        let expected = self.commands.len();
        let items = match transport.transaction(self.commands).await? {
            RespValue::Array(Some(items)) => items,
            RespValue::Array(None) => {
                return Err(RkvError::TransactionAborted(
                    "EXEC returned nil, no writes applied".to_string(),
                ))
            }
            RespValue::Error(message) => {
                return Err(RkvError::TransactionAborted(
                    String::from_utf8_lossy(&message).into_owned(),
                ))
            }
            reply => return Err(unexpected("array", reply)),
        };

        if items.len() != expected {
            return Err(RkvError::TransactionAborted(format!(
                "EXEC returned {} results for {} operations",
                items.len(),
                expected
            )));
        }

        Ok(items
            .into_iter()
            .map(|item| match item.error_message() {
                Some(message) => Err(RkvError::Operation(message)),
                None => Ok(item),
            })
            .collect())
    }
}

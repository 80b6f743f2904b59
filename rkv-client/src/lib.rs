//! # ResilientKV Async Client
//!
//! Purpose: Connect to a Redis-compatible store (single node or cluster) with
//! bounded retries, then expose a typed JSON read/write surface over it.
//!
//! ## Design Principles
//! 1. **One Outcome per Connect**: Establishment settles exactly once, ready
//!    or failed, no matter how many lifecycle events the transport emits.
//! 2. **Strategy Pattern**: The typed client runs over any `Transport`.
//! 3. **All-or-Nothing Batches**: Multi-key writes go through `MULTI..EXEC`.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed explicitly.

mod client;
mod cluster;
mod connect;
mod retry;
mod transaction;
mod transport;

pub use client::{KvClient, RedisClient, HEALTH_REPLY};
pub use cluster::{
    key_slot, parse_cluster_node_line, parse_cluster_nodes, ClusterClient, ClusterConnection,
    ClusterMember, ClusterNode, MemberView, NodeClient, NodeRole, SLOT_COUNT,
};
pub use connect::{
    connect, create_client, create_cluster, establish, Connection, ConnectionEstablisher,
    EstablishState,
};
pub use retry::{noop_hook, RetryDecision, RetryHook, RetryPolicy};
pub use transaction::{BatchOutcome, TransactionBatch};
pub use transport::{Command, LifecycleEvent, NodeConnection, NodeSetup, Transport};

pub use rkv_common::{
    ClusterOptions, ConnectionError, ConnectionOptions, ConnectionTarget, NodeAddress,
    NodeOptions, ProtocolError, RespValue, RkvError, RkvResult,
};

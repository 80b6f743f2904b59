//! # Cluster Transport and Topology
//!
//! Purpose: Connect to a sharded cluster through its seed nodes, learn the
//! member list once, and route every command to the primary serving the
//! hash slot of its first key.
//!
//! ## Design Principles
//! 1. **Discover Once**: The topology is written a single time when the
//!    cluster becomes ready and is read-only afterwards, so member views can
//!    be handed out as plain borrows.
//! 2. **Lazy Members**: Each member connection dials on its first command.
//! 3. **No Redirect Following**: `MOVED`/`ASK` replies surface as operation
//!    errors like any other store error.
//!
//! ## Structure Overview
//!
//! ```text
//! ClusterConnection
//!   ├── seeds: Vec<NodeAddress>
//!   └── state: OnceLock<ClusterState>
//!         ├── members: Vec<ClusterMember { node, connection }>
//!         └── slot_owner: [Option<member index>; 16384]
//! ```

mod node;
mod slot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use rkv_common::{
    ConnectionError, NodeAddress, ProtocolError, RespValue, RkvError, RkvResult,
};

use crate::client::KvClient;
use crate::retry::RetryPolicy;
use crate::transport::{reconnect, Command, LifecycleEvent, NodeConnection, NodeSetup, Transport};

pub use node::{parse_cluster_node_line, parse_cluster_nodes, ClusterNode, NodeRole};
pub use slot::{key_slot, SLOT_COUNT};

/// One cluster member together with its connection.
#[derive(Debug)]
pub struct ClusterMember {
    pub node: ClusterNode,
    pub connection: NodeConnection,
}

#[derive(Debug)]
struct ClusterState {
    members: Vec<ClusterMember>,
    slot_owner: Vec<Option<usize>>,
}

impl ClusterState {
    fn build(nodes: Vec<ClusterNode>, setup: &NodeSetup) -> RkvResult<Self> {
        let mut slot_owner = vec![None; SLOT_COUNT as usize];
        let mut members = Vec::with_capacity(nodes.len());

        for (idx, node) in nodes.into_iter().enumerate() {
            if node.role == NodeRole::Primary {
                for &(start, end) in &node.slots {
                    for slot in start..=end.min(SLOT_COUNT - 1) {
                        slot_owner[slot as usize] = Some(idx);
                    }
                }
            }
            members.push(ClusterMember {
                connection: NodeConnection::new(node.address(), setup.clone()),
                node,
            });
        }

        if !members.iter().any(|m| m.node.role == NodeRole::Primary) {
            return Err(RkvError::Cluster("no primary nodes found".to_string()));
        }

        Ok(ClusterState {
            members,
            slot_owner,
        })
    }

    fn first_primary(&self) -> Option<&NodeConnection> {
        self.members
            .iter()
            .find(|m| m.node.role == NodeRole::Primary)
            .map(|m| &m.connection)
    }
}

/// Connection to a sharded cluster.
#[derive(Debug)]
pub struct ClusterConnection {
    seeds: Vec<NodeAddress>,
    setup: NodeSetup,
    state: OnceLock<ClusterState>,
    closed: AtomicBool,
}

impl ClusterConnection {
    pub fn new(seeds: Vec<NodeAddress>, setup: NodeSetup) -> Self {
        ClusterConnection {
            seeds,
            setup,
            state: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates the handle and starts topology discovery, retried by `policy`.
    pub fn open(
        seeds: Vec<NodeAddress>,
        setup: NodeSetup,
        policy: RetryPolicy,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let cluster = Arc::new(Self::new(seeds, setup));
        let (events, subscription) = mpsc::unbounded_channel();

        let driver = Arc::clone(&cluster);
        tokio::spawn(async move {
            reconnect::drive("cluster", &policy, &events, || {
                let cluster = Arc::clone(&driver);
                async move { cluster.discover().await }
            })
            .await;
        });

        (cluster, subscription)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.state.get().is_some()
    }

    /// Asks each seed for `CLUSTER NODES` until one answers.
    ///
    /// The error of the last seed tried is returned when none answers, so a
    /// cluster whose seeds all refuse reports a refused connection.
    pub(crate) async fn discover(&self) -> RkvResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        if self.is_ready() {
            return Ok(());
        }

        let mut last_error = None;
        for seed in &self.seeds {
            let probe = NodeConnection::new(seed.to_string(), self.setup.clone());
            let reply = probe.execute(Command::new("CLUSTER").arg("NODES")).await;
            let _ = probe.shutdown().await;

            let text = match reply {
                Ok(RespValue::Bulk(Some(text))) => String::from_utf8_lossy(&text).into_owned(),
                Ok(RespValue::Error(message)) => {
                    last_error = Some(RkvError::Cluster(
                        String::from_utf8_lossy(&message).into_owned(),
                    ));
                    continue;
                }
                Ok(other) => {
                    last_error = Some(ProtocolError::unexpected("bulk string", other).into());
                    continue;
                }
                Err(err) => {
                    debug!(seed = %seed, error = %err, "seed unavailable");
                    last_error = Some(err);
                    continue;
                }
            };

            let nodes = parse_cluster_nodes(&text, &seed.host);
            debug!(seed = %seed, members = nodes.len(), "discovered cluster topology");
            let state = ClusterState::build(nodes, &self.setup)?;
            // Only the reconnect loop writes the topology; a lost race keeps the first.
            let _ = self.state.set(state);
            return Ok(());
        }

        Err(last_error.unwrap_or_else(|| ConnectionError::NoStartupNodes.into()))
    }

    fn ready_state(&self) -> RkvResult<&ClusterState> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        self.state
            .get()
            .ok_or_else(|| RkvError::Cluster("cluster topology is not ready".to_string()))
    }

    /// Picks the member that should receive a command with `key` (or none).
    fn route(&self, key: Option<&[u8]>) -> RkvResult<&NodeConnection> {
        let state = self.ready_state()?;
        match key {
            Some(key) => {
                let slot = key_slot(key);
                state.slot_owner[slot as usize]
                    .map(|idx| &state.members[idx].connection)
                    .ok_or_else(|| {
                        RkvError::Cluster(format!("slot {} is not served by any node", slot))
                    })
            }
            None => state
                .first_primary()
                .ok_or_else(|| RkvError::Cluster("no primary nodes found".to_string())),
        }
    }

    /// Members filtered by role; `None` returns every member.
    ///
    /// Empty until the cluster is ready.
    pub fn members(&self, role: Option<NodeRole>) -> Vec<&ClusterMember> {
        match self.state.get() {
            Some(state) => state
                .members
                .iter()
                .filter(|m| role.map_or(true, |r| m.node.role == r))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Transport for ClusterConnection {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        let node = self.route(command.first_key())?;
        node.execute(command).await
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        let key = commands.iter().find_map(|c| c.first_key());
        let node = self.route(key)?;
        node.transaction(commands).await
    }

    async fn shutdown(&self) -> RkvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(state) = self.state.get() {
            for member in &state.members {
                member.connection.shutdown().await?;
            }
        }
        debug!(seeds = self.seeds.len(), "cluster connection closed");
        Ok(())
    }
}

/// Borrowed view of one cluster member.
///
/// Commands go straight to the member connection. `shutdown` leaves the
/// connection open: the cluster owns it and closes it with its own shutdown.
#[derive(Debug, Clone, Copy)]
pub struct MemberView<'a> {
    member: &'a ClusterMember,
}

impl<'a> MemberView<'a> {
    pub fn node(&self) -> &'a ClusterNode {
        &self.member.node
    }

    pub fn addr(&self) -> &'a str {
        self.member.connection.addr()
    }
}

#[async_trait]
impl<'a> Transport for MemberView<'a> {
    async fn execute(&self, command: Command) -> RkvResult<RespValue> {
        self.member.connection.execute(command).await
    }

    async fn transaction(&self, commands: Vec<Command>) -> RkvResult<RespValue> {
        self.member.connection.transaction(commands).await
    }

    async fn shutdown(&self) -> RkvResult<()> {
        Ok(())
    }
}

/// Typed client bound to one cluster member.
pub type NodeClient<'a> = KvClient<MemberView<'a>>;

/// Typed client over a cluster connection.
pub type ClusterClient = KvClient<Arc<ClusterConnection>>;

impl KvClient<Arc<ClusterConnection>> {
    /// Per-member client facades filtered by role.
    ///
    /// Each facade borrows its member, so it cannot outlive the cluster
    /// client it came from, and shutting it down does not close the member.
    pub fn nodes(&self, role: Option<NodeRole>) -> Vec<NodeClient<'_>> {
        self.transport()
            .members(role)
            .into_iter()
            .map(|member| KvClient::new(MemberView { member }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = "\
aaa 10.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-8191
bbb 10.0.0.2:7001@17001 master - 0 0 2 connected 8192-16383
ccc 10.0.0.3:7002@17002 slave aaa 0 0 1 connected
";

    fn ready_cluster() -> ClusterConnection {
        let cluster = ClusterConnection::new(
            vec![NodeAddress::new("10.0.0.1", 7000)],
            NodeSetup::default(),
        );
        let state = ClusterState::build(
            parse_cluster_nodes(TOPOLOGY, "10.0.0.1"),
            &NodeSetup::default(),
        )
        .unwrap();
        cluster.state.set(state).unwrap();
        cluster
    }

    #[test]
    fn routes_keys_to_slot_owner() {
        let cluster = ready_cluster();
        // "bar" hashes to slot 5061, "foo" to 12182.
        assert_eq!(cluster.route(Some(&b"bar"[..])).unwrap().addr(), "10.0.0.1:7000");
        assert_eq!(cluster.route(Some(&b"foo"[..])).unwrap().addr(), "10.0.0.2:7001");
        assert_eq!(cluster.route(None).unwrap().addr(), "10.0.0.1:7000");
    }

    #[test]
    fn filters_members_by_role() {
        let cluster = ready_cluster();
        assert_eq!(cluster.members(Some(NodeRole::Primary)).len(), 2);
        assert_eq!(cluster.members(Some(NodeRole::Replica)).len(), 1);
        assert_eq!(cluster.members(None).len(), 3);
    }

    #[test]
    fn unready_cluster_rejects_commands() {
        let cluster = ClusterConnection::new(Vec::new(), NodeSetup::default());
        assert!(matches!(cluster.route(None), Err(RkvError::Cluster(_))));
        assert!(cluster.members(None).is_empty());
    }

    #[test]
    fn topology_without_primary_is_rejected() {
        let nodes = parse_cluster_nodes("ccc 10.0.0.3:7002 slave aaa 0 0 1 connected", "x");
        assert!(ClusterState::build(nodes, &NodeSetup::default()).is_err());
    }

    #[tokio::test]
    async fn closed_cluster_rejects_commands() {
        let cluster = ready_cluster();
        cluster.shutdown().await.unwrap();
        let err = cluster.execute(Command::new("PING")).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn facade_shutdown_leaves_member_open() {
        let client = KvClient::new(Arc::new(ready_cluster()));
        let primaries = client.nodes(Some(NodeRole::Primary));
        assert_eq!(primaries[0].transport().node().id, "aaa");

        primaries[0].shutdown().await.unwrap();

        assert!(!client.transport().is_closed());
        assert!(client
            .transport()
            .members(None)
            .iter()
            .all(|member| !member.connection.is_closed()));
    }

    #[tokio::test]
    async fn discovery_without_seeds_fails() {
        let cluster = ClusterConnection::new(Vec::new(), NodeSetup::default());
        let err = cluster.discover().await.unwrap_err();
        assert!(matches!(
            err,
            RkvError::Connection(ConnectionError::NoStartupNodes)
        ));
    }
}

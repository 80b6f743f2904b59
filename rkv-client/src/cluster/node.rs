//! Cluster member description parsed from `CLUSTER NODES`.

use std::fmt;

/// Role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Primary,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// One member as reported by `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// Node ID.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    /// Primary node ID (replicas only).
    pub primary_id: Option<String>,
    /// Inclusive slot ranges served (primaries only).
    pub slots: Vec<(u16, u16)>,
    /// Link state is `connected` and no `fail` flag is set.
    pub available: bool,
}

impl ClusterNode {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses a full `CLUSTER NODES` reply, skipping blank and malformed lines.
///
/// `seed_host` replaces an empty host, which a node reports for itself
/// before it has learned its own address.
pub fn parse_cluster_nodes(reply: &str, seed_host: &str) -> Vec<ClusterNode> {
    reply
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_cluster_node_line(line, seed_host))
        .collect()
}

/// Parses one line.
///
/// Format: `<id> <ip:port@cport> <flags> <primary> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> ...`
pub fn parse_cluster_node_line(line: &str, seed_host: &str) -> Option<ClusterNode> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let (host, port) = parse_node_address(parts[1])?;
    let host = if host.is_empty() {
        seed_host.to_string()
    } else {
        host
    };

    let flags: Vec<&str> = parts[2].split(',').collect();
    let role = if flags.contains(&"master") {
        NodeRole::Primary
    } else if flags.contains(&"slave") || flags.contains(&"replica") {
        NodeRole::Replica
    } else {
        return None;
    };

    let primary_id = match (role, parts[3]) {
        (NodeRole::Replica, id) if id != "-" => Some(id.to_string()),
        _ => None,
    };

    let available = parts[7] == "connected" && !flags.iter().any(|f| *f == "fail");

    let slots = match role {
        NodeRole::Primary => parts[8..].iter().filter_map(|s| parse_slot_range(s)).collect(),
        NodeRole::Replica => Vec::new(),
    };

    Some(ClusterNode {
        id: parts[0].to_string(),
        host,
        port,
        role,
        primary_id,
        slots,
        available,
    })
}

/// Parses `host:port`, `host:port@cport` or `host:port@cport,hostname`.
fn parse_node_address(addr: &str) -> Option<(String, u16)> {
    let addr = addr.split(',').next().unwrap_or(addr);
    let host_port = addr.split('@').next().unwrap_or(addr);
    let (host, port) = host_port.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

/// Parses `0-5460` or `42`; migrating slots like `[93->-id]` are skipped.
fn parse_slot_range(s: &str) -> Option<(u16, u16)> {
    if s.starts_with('[') {
        return None;
    }
    match s.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot = s.parse().ok()?;
            Some((slot, slot))
        }
    }
}

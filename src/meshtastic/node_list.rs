//! The table of every node the session has heard of.
//!
//! Lock order: the map lock is always taken before any node lock, and no node lock is held
//! while the map lock is acquired.

use crate::meshtastic::node::{epoch, time_ago, Neighbor, Node, NodeHandle, BROADCAST_ID, UNKNOWN_ID};
use crate::protobuf::meshtastic_generated as proto;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct NodeList {
    nodes: RwLock<HashMap<u32, NodeHandle>>,
}

impl NodeList {
    /// A list holding only the `Broadcast` and `Unknown` sentinels.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            BROADCAST_ID,
            NodeHandle::new(Node::named(BROADCAST_ID, "CAST", "Everyone")),
        );
        nodes.insert(UNKNOWN_ID, NodeHandle::new(Node::named(UNKNOWN_ID, "UNKN", "Unknown")));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    fn map(&self) -> RwLockReadGuard<'_, HashMap<u32, NodeHandle>> {
        self.nodes.read().unwrap_or_else(|p| p.into_inner())
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, HashMap<u32, NodeHandle>> {
        self.nodes.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, id: u32) -> Option<NodeHandle> {
        self.map().get(&id).cloned()
    }

    /// Look up a node, creating a placeholder on first sighting. The flag is true when created.
    pub fn get_or_create(&self, id: u32) -> (NodeHandle, bool) {
        if let Some(node) = self.get(id) {
            return (node, false);
        }
        let mut map = self.map_mut();
        // Another task may have inserted between the two locks.
        if let Some(node) = map.get(&id) {
            return (node.clone(), false);
        }
        let node = NodeHandle::new(Node::new(id));
        map.insert(id, node.clone());
        (node, true)
    }

    pub fn broadcast(&self) -> NodeHandle {
        self.get_or_create(BROADCAST_ID).0
    }

    pub fn unknown(&self) -> NodeHandle {
        self.get_or_create(UNKNOWN_ID).0
    }

    /// Register the radio we are attached to. An existing entry is kept and flagged.
    pub fn adopt_local(&self, id: u32) -> NodeHandle {
        let (node, _) = self.get_or_create(id);
        node.write().connected = true;
        node
    }

    /// Create or merge a node database entry. The flag is true when the node is new.
    pub fn update_node(&self, info: &proto::NodeInfo) -> (NodeHandle, bool) {
        let (node, created) = self.get_or_create(info.num);
        node.write().apply_info(info);
        (node, created)
    }

    /// Replace `node`'s neighbor list, creating placeholders for neighbors we have not seen.
    pub fn replace_neighbors(
        &self,
        node: &NodeHandle,
        reported_at: Option<DateTime<Utc>>,
        raw: &[proto::Neighbor],
    ) {
        let neighbors: Vec<Neighbor> = raw
            .iter()
            .map(|n| {
                let (handle, _) = self.get_or_create(n.node_id);
                Neighbor {
                    id: n.node_id,
                    node: handle.downgrade(),
                    snr: n.snr,
                    reported_at: epoch(n.last_rx_time).or(reported_at),
                }
            })
            .collect();
        node.write().neighbors = neighbors;
    }

    /// Resolve what a user typed into a known node: `!8e92a31f`, `8e92a31f`, a short name of
    /// up to four characters (case-insensitive) or a decimal node number. Sentinels never match.
    pub fn find(&self, needle: &str) -> Option<NodeHandle> {
        let needle = needle.trim();
        let hex = needle.strip_prefix('!').unwrap_or(needle);
        let by_id = if hex.len() == 8 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            u32::from_str_radix(hex, 16).ok()
        } else if !needle.is_empty() && needle.bytes().all(|b| b.is_ascii_digit()) {
            needle.parse::<u32>().ok().filter(|&id| id > 0)
        } else {
            None
        };
        let found = match by_id {
            Some(id) => self.get(id),
            None if !needle.is_empty() && needle.chars().count() <= 4 => {
                let handles: Vec<NodeHandle> = self.map().values().cloned().collect();
                handles
                    .into_iter()
                    .filter(|h| {
                        let n = h.read();
                        !n.is_sentinel() && n.short_name.eq_ignore_ascii_case(needle)
                    })
                    .min_by_key(|h| h.id())
            }
            None => None,
        };
        found.filter(|h| !h.read().is_sentinel())
    }

    /// Number of entries, sentinels included.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Real nodes in display order: fewest hops first, then most recently heard.
    pub fn sorted(&self) -> Vec<NodeHandle> {
        let handles: Vec<NodeHandle> = self.map().values().cloned().collect();
        let mut keyed: Vec<(u32, Reverse<Option<DateTime<Utc>>>, NodeHandle)> = handles
            .into_iter()
            .filter_map(|h| {
                let (sentinel, hops, heard) = {
                    let n = h.read();
                    (n.is_sentinel(), n.hops_away, n.last_heard)
                };
                (!sentinel).then_some((hops, Reverse(heard), h))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.id().cmp(&b.2.id())));
        keyed.into_iter().map(|(_, _, h)| h).collect()
    }
}

impl Default for NodeList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for handle in self.sorted() {
            let n = handle.read();
            let heard = n
                .last_heard
                .map(|t| format!("heard {} ago", time_ago(t)))
                .unwrap_or_else(|| "never heard".to_string());
            let hops = if n.connected {
                "local".to_string()
            } else {
                format!("{} hops", n.hops_away)
            };
            writeln!(f, "  {} - {}, {}", n, hops, heard)?;
        }
        Ok(())
    }
}

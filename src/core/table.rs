//! The compiled, index-based form of a graph.
//!
//! A `CompiledTable` is read-only once built: there is no mutation API, so
//! it can be shared by `Arc` across any number of executors and threads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::core::host::ConditionSource;
use crate::schema::graph::GraphKind;
use crate::schema::node::Outcome;
use crate::schema::normalize_key;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonSerialize(#[from] ron::Error),
    #[error("table fingerprint mismatch: stored {stored:#x}, computed {computed:#x}")]
    FingerprintMismatch { stored: u64, computed: u64 },
    #[error("malformed table: {0}")]
    Malformed(String),
}

/// Dense index of a node in a compiled table. The entry is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ENTRY: NodeIndex = NodeIndex(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an edge in a compiled table's edge array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeIndex(pub u32);

impl EdgeIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a host condition in a compiled table's condition side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionIndex(pub u32);

impl ConditionIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a host event in a compiled table's event side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventIndex(pub u32);

impl EventIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An external identifier: the normalized lookup key plus the name as
/// authored, kept for debugging and tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub key: String,
    pub name: String,
}

/// A guard resolved to a condition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledGuard {
    pub condition: ConditionIndex,
    pub negate: bool,
}

impl CompiledGuard {
    pub fn holds<C: ConditionSource + ?Sized>(&self, conditions: &C) -> bool {
        conditions.is_met(self.condition) != self.negate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTask {
    /// Normalized node id, the key hosts use to find this task.
    pub key: String,
    pub task_string: String,
    pub quantity: u32,
    pub optional: bool,
    pub hidden: bool,
    /// Reports made before the task was reached count toward it.
    pub retroactive: bool,
    pub description: String,
}

/// Node payload with every identifier resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Say {
        speaker: String,
        text: String,
        alternatives: Vec<String>,
    },
    Choice {
        speaker: String,
        prompt: String,
    },
    Task(CompiledTask),
    Branch {
        description: String,
    },
    Event {
        event: EventIndex,
    },
    Gate(CompiledGuard),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledNode {
    /// Authored id, for debugging and `activate_at`.
    pub id: String,
    pub payload: Payload,
    /// Events fired on entry, in firing order.
    pub events: Vec<EventIndex>,
    pub first_edge: u32,
    pub edge_count: u32,
    pub terminal: Option<Outcome>,
    pub repeatable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledEdge {
    /// Authored id, for debugging.
    pub id: String,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub guard: Option<CompiledGuard>,
    pub priority: i32,
    pub label: Option<String>,
}

/// Immutable runtime form of a validated graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTable {
    graph_id: String,
    version: u32,
    kind: GraphKind,
    nodes: Vec<CompiledNode>,
    edges: Vec<CompiledEdge>,
    conditions: Vec<Identifier>,
    events: Vec<Identifier>,
    tasks: BTreeMap<String, NodeIndex>,
    node_ids: BTreeMap<String, NodeIndex>,
    fingerprint: u64,
}

/// Everything but the fingerprint, in serialization order.
#[derive(Serialize)]
struct TableContent<'a> {
    graph_id: &'a str,
    version: u32,
    kind: GraphKind,
    nodes: &'a [CompiledNode],
    edges: &'a [CompiledEdge],
    conditions: &'a [Identifier],
    events: &'a [Identifier],
    tasks: &'a BTreeMap<String, NodeIndex>,
    node_ids: &'a BTreeMap<String, NodeIndex>,
}

impl CompiledTable {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        graph_id: String,
        version: u32,
        kind: GraphKind,
        nodes: Vec<CompiledNode>,
        edges: Vec<CompiledEdge>,
        conditions: Vec<Identifier>,
        events: Vec<Identifier>,
        tasks: BTreeMap<String, NodeIndex>,
    ) -> Result<CompiledTable, ron::Error> {
        let node_ids = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), NodeIndex(i as u32)))
            .collect();
        let mut table = CompiledTable {
            graph_id,
            version,
            kind,
            nodes,
            edges,
            conditions,
            events,
            tasks,
            node_ids,
            fingerprint: 0,
        };
        table.fingerprint = table.compute_fingerprint()?;
        Ok(table)
    }

    fn compute_fingerprint(&self) -> Result<u64, ron::Error> {
        let content = TableContent {
            graph_id: &self.graph_id,
            version: self.version,
            kind: self.kind,
            nodes: &self.nodes,
            edges: &self.edges,
            conditions: &self.conditions,
            events: &self.events,
            tasks: &self.tasks,
            node_ids: &self.node_ids,
        };
        Ok(content_hash(ron::to_string(&content)?.as_bytes()))
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    /// Hash of the table content. Changes whenever the compiled content
    /// does, even if the author forgot to bump the version.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[CompiledNode] {
        &self.nodes
    }

    /// The entry node. Every table has one.
    pub fn entry(&self) -> &CompiledNode {
        &self.nodes[NodeIndex::ENTRY.index()]
    }

    pub fn node(&self, index: NodeIndex) -> Option<&CompiledNode> {
        self.nodes.get(index.index())
    }

    pub fn edges(&self) -> &[CompiledEdge] {
        &self.edges
    }

    pub fn edge(&self, index: EdgeIndex) -> Option<&CompiledEdge> {
        self.edges.get(index.index())
    }

    /// Outgoing edges of a node, already in offer order (priority, then
    /// declared order).
    pub fn outgoing(&self, index: NodeIndex) -> impl Iterator<Item = (EdgeIndex, &CompiledEdge)> {
        let range = match self.node(index) {
            Some(node) => node.first_edge as usize..(node.first_edge + node.edge_count) as usize,
            None => 0..0,
        };
        self.edges[range.clone()]
            .iter()
            .zip(range)
            .map(|(edge, i)| (EdgeIndex(i as u32), edge))
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_ids.get(id).copied()
    }

    /// Look up a task node by key (its node id, matched case- and
    /// whitespace-insensitively).
    pub fn task_index(&self, key: &str) -> Option<NodeIndex> {
        self.tasks.get(&normalize_key(key)).copied()
    }

    /// Task keys with their nodes, in key order.
    pub fn tasks(&self) -> impl Iterator<Item = (&str, NodeIndex)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn conditions(&self) -> &[Identifier] {
        &self.conditions
    }

    pub fn condition_index(&self, name: &str) -> Option<ConditionIndex> {
        lookup(&self.conditions, name).map(ConditionIndex)
    }

    pub fn condition_name(&self, index: ConditionIndex) -> Option<&str> {
        self.conditions.get(index.index()).map(|i| i.name.as_str())
    }

    pub fn events(&self) -> &[Identifier] {
        &self.events
    }

    pub fn event_name(&self, index: EventIndex) -> Option<&str> {
        self.events.get(index.index()).map(|i| i.name.as_str())
    }

    pub fn to_ron(&self) -> Result<String, TableError> {
        Ok(ron::to_string(self)?)
    }

    /// Parse a stored table. The fingerprint and every index are checked,
    /// so a table that loads is safe to hand to an executor.
    pub fn from_ron(input: &str) -> Result<CompiledTable, TableError> {
        let table: CompiledTable = ron::from_str(input)?;
        table.check_indices()?;
        let computed = table.compute_fingerprint()?;
        if computed != table.fingerprint {
            return Err(TableError::FingerprintMismatch {
                stored: table.fingerprint,
                computed,
            });
        }
        Ok(table)
    }

    pub fn load_from_ron(path: &Path) -> Result<CompiledTable, TableError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron(&contents)
    }

    pub fn save_to_ron(&self, path: &Path) -> Result<(), TableError> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(self.to_ron()?.as_bytes())?;
        Ok(())
    }

    fn check_indices(&self) -> Result<(), TableError> {
        let node_count = self.nodes.len() as u32;
        if node_count == 0 {
            return Err(TableError::Malformed("table has no nodes".to_string()));
        }
        for node in &self.nodes {
            if node.first_edge as usize + node.edge_count as usize > self.edges.len() {
                return Err(TableError::Malformed(format!(
                    "node '{}' edge range out of bounds",
                    node.id
                )));
            }
            let events_ok = node
                .events
                .iter()
                .all(|e| e.index() < self.events.len());
            let payload_ok = match &node.payload {
                Payload::Event { event } => event.index() < self.events.len(),
                Payload::Gate(guard) => guard.condition.index() < self.conditions.len(),
                _ => true,
            };
            if !events_ok || !payload_ok {
                return Err(TableError::Malformed(format!(
                    "node '{}' references an unknown event or condition",
                    node.id
                )));
            }
        }
        let lookups_ok = self
            .tasks
            .values()
            .chain(self.node_ids.values())
            .all(|i| i.0 < node_count);
        if !lookups_ok {
            return Err(TableError::Malformed(
                "identifier map points outside the table".to_string(),
            ));
        }
        for edge in &self.edges {
            if edge.from.0 >= node_count || edge.to.0 >= node_count {
                return Err(TableError::Malformed(format!(
                    "edge '{}' points outside the table",
                    edge.id
                )));
            }
            if let Some(guard) = edge.guard {
                if guard.condition.index() >= self.conditions.len() {
                    return Err(TableError::Malformed(format!(
                        "edge '{}' references an unknown condition",
                        edge.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn lookup(identifiers: &[Identifier], name: &str) -> Option<u32> {
    let key = normalize_key(name);
    identifiers
        .binary_search_by(|i| i.key.as_str().cmp(key.as_str()))
        .ok()
        .map(|i| i as u32)
}

/// First eight bytes of the SHA-256 digest of `bytes`, little-endian.
/// Saved states carry this value, so it must not vary by platform.
fn content_hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_pinned() {
        assert_eq!(content_hash(b""), 0x141c_fc98_42c4_b0e3);
        assert_eq!(content_hash(b"narrative-graph"), 0x7e18_041d_2a60_44d8);
    }

    #[test]
    fn fingerprint_covers_content_only() {
        let table = CompiledTable::assemble(
            "tiny".to_string(),
            1,
            GraphKind::Dialogue,
            vec![CompiledNode {
                id: "only".to_string(),
                payload: Payload::Branch {
                    description: String::new(),
                },
                events: Vec::new(),
                first_edge: 0,
                edge_count: 0,
                terminal: Some(Outcome::Success),
                repeatable: false,
            }],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
        )
        .unwrap();
        let content = TableContent {
            graph_id: "tiny",
            version: 1,
            kind: GraphKind::Dialogue,
            nodes: &table.nodes,
            edges: &[],
            conditions: &[],
            events: &[],
            tasks: &BTreeMap::new(),
            node_ids: &table.node_ids,
        };
        let expected = content_hash(ron::to_string(&content).unwrap().as_bytes());
        assert_eq!(table.fingerprint(), expected);

        let reloaded = CompiledTable::from_ron(&table.to_ron().unwrap()).unwrap();
        assert_eq!(reloaded.fingerprint(), expected);
    }
}

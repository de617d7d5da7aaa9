//! Authored graphs: mutation API for editors plus RON load/save.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::edge::{Edge, EdgeId, Guard};
use super::node::{Node, NodeId, NodeKind, Outcome};
use super::task::TaskSpec;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    #[error("duplicate edge id: {0}")]
    DuplicateEdge(EdgeId),
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("unknown edge: {0}")]
    UnknownEdge(EdgeId),
    #[error("node is not terminal: {0}")]
    NotTerminal(NodeId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonSerialize(#[from] ron::Error),
}

/// Which editor a graph belongs to. Quest graphs are held to a stricter
/// cycle policy than dialogue graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphKind {
    Dialogue,
    Quest,
}

/// An authored dialogue or quest graph.
///
/// Nodes and edges are kept in id order so every query is deterministic.
/// Each node remembers its outgoing edges in the order they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    id: String,
    version: u32,
    kind: GraphKind,
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    entry: Option<NodeId>,
    terminals: BTreeMap<NodeId, Outcome>,
}

impl Graph {
    pub fn new(id: &str, kind: GraphKind) -> Self {
        Self {
            id: id.to_string(),
            version: 1,
            kind,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            entry: None,
            terminals: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content version, bumped by the editor whenever the graph is saved
    /// with structural changes.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn add_node(&mut self, mut node: Node) -> Result<(), SchemaError> {
        if self.nodes.contains_key(&node.id) {
            return Err(SchemaError::DuplicateNode(node.id));
        }
        node.edges.clear();
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node together with every edge that touches it. Clears the
    /// entry and terminal markers if they pointed at the node.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, SchemaError> {
        let mut node = self
            .nodes
            .remove(id)
            .ok_or_else(|| SchemaError::UnknownNode(NodeId::new(id)))?;

        let incident: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.from.as_str() == id || e.to.as_str() == id)
            .map(|e| e.id.clone())
            .collect();
        for edge_id in incident {
            self.detach_edge(edge_id.as_str());
        }
        node.edges.clear();

        self.terminals.remove(id);
        if self.entry.as_ref().is_some_and(|e| e.as_str() == id) {
            self.entry = None;
        }
        Ok(node)
    }

    /// Add an edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), SchemaError> {
        if self.edges.contains_key(&edge.id) {
            return Err(SchemaError::DuplicateEdge(edge.id));
        }
        if !self.nodes.contains_key(&edge.to) {
            return Err(SchemaError::UnknownNode(edge.to));
        }
        let source = self
            .nodes
            .get_mut(&edge.from)
            .ok_or_else(|| SchemaError::UnknownNode(edge.from.clone()))?;
        source.edges.push(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge, SchemaError> {
        self.detach_edge(id)
            .ok_or_else(|| SchemaError::UnknownEdge(EdgeId::new(id)))
    }

    fn detach_edge(&mut self, id: &str) -> Option<Edge> {
        let edge = self.edges.remove(id)?;
        if let Some(source) = self.nodes.get_mut(&edge.from) {
            source.edges.retain(|e| e.as_str() != id);
        }
        Some(edge)
    }

    pub fn set_entry(&mut self, id: &str) -> Result<(), SchemaError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| SchemaError::UnknownNode(NodeId::new(id)))?;
        self.entry = Some(node.id.clone());
        Ok(())
    }

    /// Mark a node as terminal, ending any traversal that reaches it with
    /// the given outcome. Marking twice just updates the outcome.
    pub fn mark_terminal(&mut self, id: &str, outcome: Outcome) -> Result<(), SchemaError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| SchemaError::UnknownNode(NodeId::new(id)))?;
        self.terminals.insert(node.id.clone(), outcome);
        Ok(())
    }

    /// Change the outcome of a node that is already terminal.
    pub fn set_outcome(&mut self, id: &str, outcome: Outcome) -> Result<(), SchemaError> {
        let slot = self
            .terminals
            .get_mut(id)
            .ok_or_else(|| SchemaError::NotTerminal(NodeId::new(id)))?;
        *slot = outcome;
        Ok(())
    }

    /// Returns true if the node was terminal.
    pub fn unmark_terminal(&mut self, id: &str) -> bool {
        self.terminals.remove(id).is_some()
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges in ascending id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Outgoing edges of a node in declared order. Empty for unknown nodes.
    pub fn edges_from<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.nodes
            .get(id)
            .map(|n| n.edges.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
    }

    pub fn entry(&self) -> Option<&NodeId> {
        self.entry.as_ref()
    }

    /// Terminal nodes with their outcomes, in ascending id order.
    pub fn terminals(&self) -> impl Iterator<Item = (&NodeId, Outcome)> {
        self.terminals.iter().map(|(id, outcome)| (id, *outcome))
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminals.contains_key(id)
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        self.terminals.get(id).copied()
    }

    /// Load a graph from a RON authoring file.
    pub fn load_from_ron(path: &Path) -> Result<Graph, SchemaError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a graph from a RON string.
    ///
    /// Edges are attached in file order, which becomes the declared order
    /// of each node's outgoing edges.
    pub fn parse_ron(input: &str) -> Result<Graph, SchemaError> {
        let raw: RawGraph = ron::from_str(input)?;
        let mut graph = Graph::new(&raw.id, raw.kind);
        graph.version = raw.version;

        let mut terminals = Vec::new();
        for raw_node in raw.nodes {
            let mut node = Node::new(&raw_node.id, raw_node.kind.into());
            node.events = raw_node.events;
            node.repeatable = raw_node.repeatable;
            if raw_node.terminal {
                terminals.push((raw_node.id, raw_node.outcome));
            }
            graph.add_node(node)?;
        }

        for raw_edge in raw.edges {
            graph.add_edge(Edge {
                id: EdgeId(raw_edge.id),
                from: NodeId(raw_edge.from),
                to: NodeId(raw_edge.to),
                guard: raw_edge.guard,
                priority: raw_edge.priority,
                label: raw_edge.label,
            })?;
        }

        for (id, outcome) in terminals {
            graph.mark_terminal(&id, outcome)?;
        }
        if let Some(entry) = raw.entry {
            graph.set_entry(&entry)?;
        }
        Ok(graph)
    }

    /// Serialize to the RON authoring format.
    pub fn to_ron(&self) -> Result<String, SchemaError> {
        let nodes = self
            .nodes
            .values()
            .map(|node| RawNode {
                id: node.id.0.clone(),
                kind: RawKind::from(&node.kind),
                events: node.events.clone(),
                repeatable: node.repeatable,
                terminal: self.is_terminal(node.id.as_str()),
                outcome: self.outcome(node.id.as_str()).unwrap_or_default(),
            })
            .collect();

        // Grouped by source so declared order survives a reload.
        let edges = self
            .nodes
            .values()
            .flat_map(|node| self.edges_from(node.id.as_str()))
            .map(|edge| RawEdge {
                id: edge.id.0.clone(),
                from: edge.from.0.clone(),
                to: edge.to.0.clone(),
                guard: edge.guard.clone(),
                priority: edge.priority,
                label: edge.label.clone(),
            })
            .collect();

        let raw = RawGraph {
            id: self.id.clone(),
            version: self.version,
            kind: self.kind,
            entry: self.entry.as_ref().map(|e| e.0.clone()),
            nodes,
            edges,
        };
        Ok(ron::ser::to_string_pretty(
            &raw,
            ron::ser::PrettyConfig::default(),
        )?)
    }
}

// RON authoring format. Kinds are written as struct variants so files
// read naturally, e.g. `Task(name: "Kill", argument: "Rat", quantity: 3)`.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "Graph")]
struct RawGraph {
    id: String,
    #[serde(default = "default_version")]
    version: u32,
    kind: GraphKind,
    #[serde(default)]
    entry: Option<String>,
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

fn default_version() -> u32 {
    1
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct RawNode {
    id: String,
    kind: RawKind,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    repeatable: bool,
    #[serde(default)]
    terminal: bool,
    #[serde(default)]
    outcome: Outcome,
}

#[derive(Debug, Serialize, Deserialize)]
enum RawKind {
    Say {
        speaker: String,
        text: String,
        #[serde(default)]
        alternatives: Vec<String>,
    },
    Choice {
        speaker: String,
        prompt: String,
    },
    Task {
        name: String,
        #[serde(default)]
        argument: String,
        #[serde(default = "default_quantity")]
        quantity: u32,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        hidden: bool,
        #[serde(default)]
        retroactive: bool,
        #[serde(default)]
        description: String,
    },
    Branch {
        description: String,
    },
    Event {
        event: String,
    },
    Gate {
        condition: String,
        #[serde(default)]
        negate: bool,
    },
}

impl From<RawKind> for NodeKind {
    fn from(raw: RawKind) -> Self {
        match raw {
            RawKind::Say {
                speaker,
                text,
                alternatives,
            } => NodeKind::Say {
                speaker,
                text,
                alternatives,
            },
            RawKind::Choice { speaker, prompt } => NodeKind::Choice { speaker, prompt },
            RawKind::Task {
                name,
                argument,
                quantity,
                optional,
                hidden,
                retroactive,
                description,
            } => NodeKind::Task(TaskSpec {
                name,
                argument,
                quantity,
                optional,
                hidden,
                retroactive,
                description,
            }),
            RawKind::Branch { description } => NodeKind::Branch { description },
            RawKind::Event { event } => NodeKind::Event { event },
            RawKind::Gate { condition, negate } => NodeKind::Gate(Guard { condition, negate }),
        }
    }
}

impl From<&NodeKind> for RawKind {
    fn from(kind: &NodeKind) -> Self {
        match kind.clone() {
            NodeKind::Say {
                speaker,
                text,
                alternatives,
            } => RawKind::Say {
                speaker,
                text,
                alternatives,
            },
            NodeKind::Choice { speaker, prompt } => RawKind::Choice { speaker, prompt },
            NodeKind::Task(task) => RawKind::Task {
                name: task.name,
                argument: task.argument,
                quantity: task.quantity,
                optional: task.optional,
                hidden: task.hidden,
                retroactive: task.retroactive,
                description: task.description,
            },
            NodeKind::Branch { description } => RawKind::Branch { description },
            NodeKind::Event { event } => RawKind::Event { event },
            NodeKind::Gate(guard) => RawKind::Gate {
                condition: guard.condition,
                negate: guard.negate,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawEdge {
    id: String,
    from: String,
    to: String,
    #[serde(default)]
    guard: Option<Guard>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_dialogue() -> Graph {
        let mut g = Graph::new("intro", GraphKind::Dialogue);
        g.add_node(Node::say("a", "Elder", "Welcome.")).unwrap();
        g.add_node(Node::choice("b", "Elder", "Will you help?")).unwrap();
        g.add_node(Node::say("c", "Elder", "Thank you.")).unwrap();
        g.add_edge(Edge::new("e1", "a", "b")).unwrap();
        g.add_edge(Edge::new("e2", "b", "c").with_label("accept")).unwrap();
        g.add_edge(Edge::new("e3", "b", "a").with_label("decline")).unwrap();
        g.set_entry("a").unwrap();
        g.mark_terminal("c", Outcome::Success).unwrap();
        g
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut g = small_dialogue();
        let err = g.add_node(Node::say("a", "X", "dup")).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateNode(id) if id.as_str() == "a"));
    }

    #[test]
    fn edge_endpoints_must_exist() {
        let mut g = small_dialogue();
        assert!(matches!(
            g.add_edge(Edge::new("e9", "a", "nowhere")),
            Err(SchemaError::UnknownNode(_))
        ));
        assert!(matches!(
            g.add_edge(Edge::new("e9", "nowhere", "a")),
            Err(SchemaError::UnknownNode(_))
        ));
        assert!(matches!(
            g.add_edge(Edge::new("e1", "a", "c")),
            Err(SchemaError::DuplicateEdge(_))
        ));
    }

    #[test]
    fn edges_from_keeps_declared_order() {
        let g = small_dialogue();
        let ids: Vec<&str> = g.edges_from("b").map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert_eq!(g.edges_from("missing").count(), 0);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = small_dialogue();
        let removed = g.remove_node("a").unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert!(g.entry().is_none());
        assert!(g.edge("e1").is_none());
        assert!(g.edge("e3").is_none());
        let ids: Vec<&str> = g.edges_from("b").map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2"]);
    }

    #[test]
    fn remove_edge_updates_source() {
        let mut g = small_dialogue();
        g.remove_edge("e2").unwrap();
        assert_eq!(g.node("b").unwrap().edges().len(), 1);
        assert!(matches!(g.remove_edge("e2"), Err(SchemaError::UnknownEdge(_))));
    }

    #[test]
    fn terminal_markers() {
        let mut g = small_dialogue();
        assert!(g.is_terminal("c"));
        g.mark_terminal("c", Outcome::Failure).unwrap();
        assert_eq!(g.outcome("c"), Some(Outcome::Failure));
        assert!(g.unmark_terminal("c"));
        assert!(!g.unmark_terminal("c"));
        assert!(g.mark_terminal("zzz", Outcome::Success).is_err());
        assert!(matches!(
            g.set_outcome("c", Outcome::Success),
            Err(SchemaError::NotTerminal(_))
        ));
        g.mark_terminal("c", Outcome::Success).unwrap();
        g.set_outcome("c", Outcome::Failure).unwrap();
        assert_eq!(g.outcome("c"), Some(Outcome::Failure));
    }

    #[test]
    fn parse_ron_graph() {
        let input = r#"(
            id: "gate_talk",
            version: 3,
            kind: Dialogue,
            entry: Some("hello"),
            nodes: [
                (id: "hello", kind: Say(speaker: "Guard", text: "Halt.", alternatives: ["Stop."])),
                (id: "check", kind: Gate(condition: "has_pass")),
                (id: "pass", kind: Say(speaker: "Guard", text: "Go on."), terminal: true, events: ["gate_opened"]),
            ],
            edges: [
                (id: "e1", from: "hello", to: "check"),
                (id: "e2", from: "check", to: "pass", priority: Some(2)),
            ],
        )"#;
        let g = Graph::parse_ron(input).unwrap();
        assert_eq!(g.id(), "gate_talk");
        assert_eq!(g.version(), 3);
        assert_eq!(g.entry().map(|e| e.as_str()), Some("hello"));
        assert!(g.is_terminal("pass"));
        assert_eq!(g.node("pass").unwrap().events, vec!["gate_opened".to_string()]);
        assert!(matches!(&g.node("check").unwrap().kind, NodeKind::Gate(guard) if guard.condition == "has_pass" && !guard.negate));
        assert_eq!(g.edge("e2").unwrap().priority, Some(2));
    }

    #[test]
    fn ron_round_trip_preserves_graph() {
        let g = small_dialogue();
        let text = g.to_ron().unwrap();
        let reloaded = Graph::parse_ron(&text).unwrap();
        assert_eq!(g, reloaded);
    }
}

//! Structural checks run on an authored graph before compilation.
//!
//! Validation never fails: it returns every problem it finds, sorted by
//! node id then edge id, so an editor can show them all at once and test
//! output stays stable.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;

use crate::core::host::ConditionCatalog;
use crate::schema::edge::EdgeId;
use crate::schema::graph::{Graph, GraphKind};
use crate::schema::node::{NodeId, NodeKind, NodeTag};

/// What is wrong with a node or edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FindingKind {
    /// The graph has no entry, or the entry names a missing node.
    MissingEntry,
    /// No path from the entry leads here.
    Unreachable,
    /// Not terminal, yet nothing leaves it.
    DanglingNode,
    /// Has outgoing edges but none of them ever lead to a terminal or
    /// repeatable node.
    NoPathToEnd,
    /// Sits on a cycle of a quest graph without being repeatable.
    IllegalCycle,
    /// A guard names a condition the host does not know.
    UnknownCondition { condition: String },
    /// Wrong number of outgoing edges for this kind of node.
    ArityViolation { tag: NodeTag, outgoing: usize },
    /// Node kind does not belong in this kind of graph.
    KindMismatch { tag: NodeTag },
    /// A mandatory task that needs no progress.
    ZeroQuantity,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEntry => write!(f, "graph has no valid entry node"),
            Self::Unreachable => write!(f, "unreachable from the entry node"),
            Self::DanglingNode => write!(f, "dead end that is not marked terminal"),
            Self::NoPathToEnd => write!(f, "no path leads to a terminal or repeatable node"),
            Self::IllegalCycle => write!(f, "on a quest cycle but not marked repeatable"),
            Self::UnknownCondition { condition } => {
                write!(f, "unknown condition '{}'", condition)
            }
            Self::ArityViolation { tag, outgoing } => {
                write!(f, "{} node has {} outgoing edge(s)", tag.name(), outgoing)
            }
            Self::KindMismatch { tag } => write!(f, "{} node does not belong in this graph", tag.name()),
            Self::ZeroQuantity => write!(f, "task requires zero progress"),
        }
    }
}

/// A single validation problem, anchored on a node and optionally an edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Finding {
    pub node: NodeId,
    pub edge: Option<EdgeId>,
    pub kind: FindingKind,
}

impl Finding {
    fn node(node: &NodeId, kind: FindingKind) -> Self {
        Self {
            node: node.clone(),
            edge: None,
            kind,
        }
    }

    fn edge(node: &NodeId, edge: &EdgeId, kind: FindingKind) -> Self {
        Self {
            node: node.clone(),
            edge: Some(edge.clone()),
            kind,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.edge {
            Some(edge) => write!(f, "node '{}', edge '{}': {}", self.node, edge, self.kind),
            None => write!(f, "node '{}': {}", self.node, self.kind),
        }
    }
}

/// Run every check against `graph`.
pub fn validate(graph: &Graph, catalog: &ConditionCatalog) -> Vec<Finding> {
    let mut findings = Vec::new();

    check_reachability(graph, &mut findings);
    check_exits(graph, &mut findings);
    if graph.kind() == GraphKind::Quest {
        check_cycles(graph, &mut findings);
    }
    check_conditions(graph, catalog, &mut findings);
    check_arity(graph, &mut findings);
    check_kinds(graph, &mut findings);

    findings.sort();
    findings.dedup();
    findings
}

fn check_reachability(graph: &Graph, findings: &mut Vec<Finding>) {
    let entry = match graph.entry() {
        Some(entry) if graph.node(entry.as_str()).is_some() => entry,
        _ => {
            findings.push(Finding::node(&NodeId::new(""), FindingKind::MissingEntry));
            return;
        }
    };

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut queue = VecDeque::new();
    seen.insert(entry.as_str());
    queue.push_back(entry.as_str());
    while let Some(id) = queue.pop_front() {
        for edge in graph.edges_from(id) {
            if seen.insert(edge.to.as_str()) {
                queue.push_back(edge.to.as_str());
            }
        }
    }

    for node in graph.nodes() {
        if !seen.contains(node.id.as_str()) {
            findings.push(Finding::node(&node.id, FindingKind::Unreachable));
        }
    }
}

fn check_exits(graph: &Graph, findings: &mut Vec<Finding>) {
    // Walk backwards from every node a traversal may legally stop or loop at.
    let mut incoming: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in graph.edges() {
        incoming
            .entry(edge.to.as_str())
            .or_default()
            .push(edge.from.as_str());
    }

    let mut can_end: FxHashSet<&str> = FxHashSet::default();
    let mut queue = VecDeque::new();
    for node in graph.nodes() {
        if graph.is_terminal(node.id.as_str()) || node.repeatable {
            can_end.insert(node.id.as_str());
            queue.push_back(node.id.as_str());
        }
    }
    while let Some(id) = queue.pop_front() {
        for &pred in incoming.get(id).map(Vec::as_slice).unwrap_or_default() {
            if can_end.insert(pred) {
                queue.push_back(pred);
            }
        }
    }

    for node in graph.nodes() {
        if graph.is_terminal(node.id.as_str()) {
            continue;
        }
        if node.edges().is_empty() {
            findings.push(Finding::node(&node.id, FindingKind::DanglingNode));
        } else if !can_end.contains(node.id.as_str()) {
            findings.push(Finding::node(&node.id, FindingKind::NoPathToEnd));
        }
    }
}

/// Tarjan's strongly connected components over node ids.
struct CycleFinder<'g> {
    graph: &'g Graph,
    index: FxHashMap<&'g str, usize>,
    lowlink: FxHashMap<&'g str, usize>,
    stack: Vec<&'g str>,
    on_stack: FxHashSet<&'g str>,
    next_index: usize,
    components: Vec<Vec<&'g str>>,
}

impl<'g> CycleFinder<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            index: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashSet::default(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<&'g str>> {
        for node in self.graph.nodes() {
            if !self.index.contains_key(node.id.as_str()) {
                self.visit(node.id.as_str());
            }
        }
        self.components
    }

    /// Number `v`, push it, and return a frame over its successors.
    fn open(&mut self, v: &'g str) -> Frame<'g> {
        self.index.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);
        let graph = self.graph;
        Frame {
            node: v,
            successors: graph.edges_from(v).map(|e| e.to.as_str()).collect(),
            next: 0,
        }
    }

    /// Depth-first walk from `root` with an explicit frame stack, so long
    /// quest chains cannot exhaust the thread stack.
    fn visit(&mut self, root: &'g str) {
        let mut frames = vec![self.open(root)];
        while let Some(frame) = frames.last_mut() {
            let v = frame.node;
            if let Some(&w) = frame.successors.get(frame.next) {
                frame.next += 1;
                if !self.index.contains_key(w) {
                    let child = self.open(w);
                    frames.push(child);
                } else if self.on_stack.contains(w) {
                    let low = self.lowlink[v].min(self.index[w]);
                    self.lowlink.insert(v, low);
                }
                continue;
            }

            frames.pop();
            if let Some(parent) = frames.last() {
                let low = self.lowlink[parent.node].min(self.lowlink[v]);
                self.lowlink.insert(parent.node, low);
            }
            if self.lowlink[v] == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack.remove(w);
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }
}

struct Frame<'g> {
    node: &'g str,
    successors: Vec<&'g str>,
    next: usize,
}

fn check_cycles(graph: &Graph, findings: &mut Vec<Finding>) {
    for component in CycleFinder::new(graph).run() {
        let members: FxHashSet<&str> = component.iter().copied().collect();
        for &id in &component {
            let Some(node) = graph.node(id) else { continue };
            if node.repeatable {
                continue;
            }
            // The edge that keeps this node inside the cycle.
            let cycle_edge = graph
                .edges_from(id)
                .find(|e| members.contains(e.to.as_str()) && (component.len() > 1 || e.to.as_str() == id));
            if let Some(edge) = cycle_edge {
                findings.push(Finding::edge(&node.id, &edge.id, FindingKind::IllegalCycle));
            }
        }
    }
}

fn check_conditions(graph: &Graph, catalog: &ConditionCatalog, findings: &mut Vec<Finding>) {
    for edge in graph.edges() {
        if let Some(guard) = &edge.guard {
            if !catalog.contains(&guard.condition) {
                findings.push(Finding::edge(
                    &edge.from,
                    &edge.id,
                    FindingKind::UnknownCondition {
                        condition: guard.condition.clone(),
                    },
                ));
            }
        }
    }
    for node in graph.nodes() {
        if let NodeKind::Gate(guard) = &node.kind {
            if !catalog.contains(&guard.condition) {
                findings.push(Finding::node(
                    &node.id,
                    FindingKind::UnknownCondition {
                        condition: guard.condition.clone(),
                    },
                ));
            }
        }
    }
}

fn check_arity(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes() {
        let outgoing = node.edges().len();
        let tag = node.tag();
        let violation = (graph.is_terminal(node.id.as_str()) && outgoing > 0)
            || (tag == NodeTag::Choice && outgoing < 2)
            || (tag == NodeTag::Say && outgoing > 1);
        if violation {
            findings.push(Finding::node(
                &node.id,
                FindingKind::ArityViolation { tag, outgoing },
            ));
        }
    }
}

fn check_kinds(graph: &Graph, findings: &mut Vec<Finding>) {
    for node in graph.nodes() {
        let tag = node.tag();
        let misplaced = match graph.kind() {
            GraphKind::Dialogue => tag.is_quest_only(),
            GraphKind::Quest => tag.is_dialogue_only(),
        };
        if misplaced {
            findings.push(Finding::node(&node.id, FindingKind::KindMismatch { tag }));
        }
        if let NodeKind::Task(task) = &node.kind {
            if task.quantity == 0 && !task.optional {
                findings.push(Finding::node(&node.id, FindingKind::ZeroQuantity));
            }
        }
    }
}

/// A non-blocking authoring hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lint {
    pub node: NodeId,
    pub message: String,
}

/// Authoring hints that never block compilation: empty lines and choice
/// options without text.
pub fn lint_warnings(graph: &Graph) -> Vec<Lint> {
    let mut lints = Vec::new();
    for node in graph.nodes() {
        match &node.kind {
            NodeKind::Say { text, .. } if text.trim().is_empty() => lints.push(Lint {
                node: node.id.clone(),
                message: "line has no text".to_string(),
            }),
            NodeKind::Choice { .. } => {
                for edge in graph.edges_from(node.id.as_str()) {
                    if edge.label.as_deref().map_or(true, |l| l.trim().is_empty()) {
                        lints.push(Lint {
                            node: node.id.clone(),
                            message: format!("option '{}' has no label", edge.id),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    lints
}

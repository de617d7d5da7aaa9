//! Turns a validated authored graph into an immutable `CompiledTable`.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::core::host::ConditionCatalog;
use crate::core::table::{
    CompiledEdge, CompiledGuard, CompiledNode, CompiledTable, CompiledTask, ConditionIndex,
    EventIndex, Identifier, NodeIndex, Payload,
};
use crate::core::validator::{validate, Finding};
use crate::schema::edge::Guard;
use crate::schema::graph::Graph;
use crate::schema::node::{Node, NodeKind};
use crate::schema::normalize_key;

/// Which identifier namespace a collision happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Condition,
    Event,
    Task,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition => write!(f, "condition"),
            Self::Event => write!(f, "event"),
            Self::Task => write!(f, "task"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("graph failed validation with {} finding(s)", .0.len())]
    InvalidGraph(Vec<Finding>),
    #[error("{kind} identifiers '{first}' and '{second}' both normalize to '{key}'")]
    DuplicateIdentifier {
        kind: IdentifierKind,
        key: String,
        first: String,
        second: String,
    },
    #[error("failed to fingerprint table: {0}")]
    Fingerprint(#[from] ron::Error),
}

/// Maps raw identifiers to normalized keys, rejecting two different raw
/// spellings of the same key.
struct Interner {
    kind: IdentifierKind,
    names: BTreeMap<String, String>,
}

impl Interner {
    fn new(kind: IdentifierKind) -> Self {
        Self {
            kind,
            names: BTreeMap::new(),
        }
    }

    fn intern(&mut self, raw: &str) -> Result<(), CompileError> {
        let key = normalize_key(raw);
        match self.names.get(&key) {
            Some(first) if first != raw => Err(CompileError::DuplicateIdentifier {
                kind: self.kind,
                key,
                first: first.clone(),
                second: raw.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.names.insert(key, raw.to_string());
                Ok(())
            }
        }
    }

    /// Identifiers in ascending key order; position is the index.
    fn into_identifiers(self) -> Vec<Identifier> {
        self.names
            .into_iter()
            .map(|(key, name)| Identifier { key, name })
            .collect()
    }
}

fn position(identifiers: &[Identifier], raw: &str) -> u32 {
    let key = normalize_key(raw);
    // Every name was interned before lookup.
    identifiers
        .binary_search_by(|i| i.key.as_str().cmp(key.as_str()))
        .unwrap_or_default() as u32
}

/// Compile `graph`. Nothing is produced unless validation passes cleanly.
pub fn compile(graph: &Graph, catalog: &ConditionCatalog) -> Result<CompiledTable, CompileError> {
    let findings = validate(graph, catalog);
    if !findings.is_empty() {
        tracing::debug!(
            "Graph '{}' rejected with {} finding(s)",
            graph.id(),
            findings.len()
        );
        return Err(CompileError::InvalidGraph(findings));
    }

    // Validation guarantees an entry; an empty table is still refused.
    let Some(entry) = graph.entry().and_then(|e| graph.node(e.as_str())) else {
        return Err(CompileError::InvalidGraph(findings));
    };
    let order: Vec<&Node> = std::iter::once(entry)
        .chain(graph.nodes().filter(|n| n.id != entry.id))
        .collect();
    let index_of: BTreeMap<&str, NodeIndex> = order
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), NodeIndex(i as u32)))
        .collect();

    let mut conditions = Interner::new(IdentifierKind::Condition);
    let mut events = Interner::new(IdentifierKind::Event);
    let mut task_keys = Interner::new(IdentifierKind::Task);
    for node in graph.nodes() {
        for event in &node.events {
            events.intern(event)?;
        }
        match &node.kind {
            NodeKind::Event { event } => events.intern(event)?,
            NodeKind::Gate(guard) => conditions.intern(&guard.condition)?,
            NodeKind::Task(_) => task_keys.intern(node.id.as_str())?,
            _ => {}
        }
    }
    for edge in graph.edges() {
        if let Some(guard) = &edge.guard {
            conditions.intern(&guard.condition)?;
        }
    }
    let conditions = conditions.into_identifiers();
    let events = events.into_identifiers();

    let resolve_guard = |guard: &Guard| CompiledGuard {
        condition: ConditionIndex(position(&conditions, &guard.condition)),
        negate: guard.negate,
    };

    let mut nodes = Vec::with_capacity(order.len());
    let mut edges = Vec::with_capacity(graph.edges().count());
    let mut tasks = BTreeMap::new();
    for (i, node) in order.iter().enumerate() {
        let mut outgoing: Vec<_> = graph.edges_from(node.id.as_str()).collect();
        // Stable, so equal priorities keep declared order.
        outgoing.sort_by_key(|e| Reverse(e.priority.unwrap_or(0)));

        let first_edge = edges.len() as u32;
        for edge in &outgoing {
            edges.push(CompiledEdge {
                id: edge.id.0.clone(),
                from: NodeIndex(i as u32),
                to: index_of[edge.to.as_str()],
                guard: edge.guard.as_ref().map(&resolve_guard),
                priority: edge.priority.unwrap_or(0),
                label: edge.label.clone(),
            });
        }

        let payload = match &node.kind {
            NodeKind::Say {
                speaker,
                text,
                alternatives,
            } => Payload::Say {
                speaker: speaker.clone(),
                text: text.clone(),
                alternatives: alternatives.clone(),
            },
            NodeKind::Choice { speaker, prompt } => Payload::Choice {
                speaker: speaker.clone(),
                prompt: prompt.clone(),
            },
            NodeKind::Task(task) => {
                let key = normalize_key(node.id.as_str());
                tasks.insert(key.clone(), NodeIndex(i as u32));
                Payload::Task(CompiledTask {
                    key,
                    task_string: task.task_string(),
                    quantity: task.quantity,
                    optional: task.optional,
                    hidden: task.hidden,
                    retroactive: task.retroactive,
                    description: task.description.clone(),
                })
            }
            NodeKind::Branch { description } => Payload::Branch {
                description: description.clone(),
            },
            NodeKind::Event { event } => Payload::Event {
                event: EventIndex(position(&events, event)),
            },
            NodeKind::Gate(guard) => Payload::Gate(resolve_guard(guard)),
        };

        nodes.push(CompiledNode {
            id: node.id.0.clone(),
            payload,
            events: node
                .events
                .iter()
                .map(|e| EventIndex(position(&events, e)))
                .collect(),
            first_edge,
            edge_count: outgoing.len() as u32,
            terminal: graph.outcome(node.id.as_str()),
            repeatable: node.repeatable,
        });
    }

    let table = CompiledTable::assemble(
        graph.id().to_string(),
        graph.version(),
        graph.kind(),
        nodes,
        edges,
        conditions,
        events,
        tasks,
    )?;
    tracing::info!(
        "Compiled graph '{}' v{}: {} nodes, {} edges, {} conditions, {} events",
        table.graph_id(),
        table.version(),
        table.node_count(),
        table.edges().len(),
        table.conditions().len(),
        table.events().len()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::{EdgeIndex, TableError};
    use crate::core::validator::FindingKind;
    use crate::schema::edge::Edge;
    use crate::schema::graph::GraphKind;
    use crate::schema::node::Outcome;
    use crate::schema::task::TaskSpec;
    use pretty_assertions::assert_eq;

    fn gatehouse() -> Graph {
        let mut g = Graph::new("gatehouse", GraphKind::Dialogue);
        g.add_node(Node::say("a_end", "Guard", "Move along.")).unwrap();
        g.add_node(Node::say("m_greet", "Guard", "Halt!").with_events(&["Guard Alerted"]))
            .unwrap();
        g.add_node(Node::choice("n_ask", "Guard", "Papers?")).unwrap();
        g.add_node(Node::event("o_open", "Gate Opened")).unwrap();
        g.add_node(Node::say("z_pass", "Guard", "Go on.")).unwrap();
        g.add_edge(Edge::new("e1", "m_greet", "n_ask")).unwrap();
        g.add_edge(Edge::new("e2", "n_ask", "a_end").with_label("No")).unwrap();
        g.add_edge(
            Edge::new("e3", "n_ask", "o_open")
                .with_label("Bribe")
                .with_guard(Guard::new("Has Gold")),
        )
        .unwrap();
        g.add_edge(
            Edge::new("e4", "n_ask", "o_open")
                .with_label("Show pass")
                .with_guard(Guard::new("has_pass"))
                .with_priority(5),
        )
        .unwrap();
        g.add_edge(Edge::new("e5", "o_open", "z_pass")).unwrap();
        g.set_entry("m_greet").unwrap();
        g.mark_terminal("a_end", Outcome::Failure).unwrap();
        g.mark_terminal("z_pass", Outcome::Success).unwrap();
        g
    }

    fn catalog() -> ConditionCatalog {
        ConditionCatalog::from_names(["has gold", "has_pass"])
    }

    #[test]
    fn entry_first_then_ascending_ids() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let ids: Vec<&str> = table.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["m_greet", "a_end", "n_ask", "o_open", "z_pass"]);
        assert_eq!(table.node_index("m_greet"), Some(NodeIndex::ENTRY));
    }

    #[test]
    fn edges_sorted_by_priority_then_declared_order() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let ask = table.node_index("n_ask").unwrap();
        let ids: Vec<&str> = table.outgoing(ask).map(|(_, e)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e2", "e3"]);
        let indices: Vec<EdgeIndex> = table.outgoing(ask).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![EdgeIndex(1), EdgeIndex(2), EdgeIndex(3)]);
    }

    #[test]
    fn identifiers_normalized_and_sorted() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let keys: Vec<&str> = table.conditions().iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["has_pass", "hasgold"]);
        assert_eq!(table.condition_name(ConditionIndex(1)), Some("Has Gold"));
        assert_eq!(table.condition_index("HAS GOLD"), Some(ConditionIndex(1)));

        let events: Vec<&str> = table.events().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(events, vec!["gateopened", "guardalerted"]);
        let greet = table.node(NodeIndex::ENTRY).unwrap();
        assert_eq!(greet.events, vec![EventIndex(1)]);
    }

    #[test]
    fn guards_resolve_to_condition_indices() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let e4 = table.edges().iter().find(|e| e.id == "e4").unwrap();
        assert_eq!(
            e4.guard,
            Some(CompiledGuard {
                condition: ConditionIndex(0),
                negate: false
            })
        );
        assert_eq!(e4.priority, 5);
    }

    #[test]
    fn terminals_keep_outcomes() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let end = table.node(table.node_index("a_end").unwrap()).unwrap();
        assert_eq!(end.terminal, Some(Outcome::Failure));
        assert_eq!(end.edge_count, 0);
    }

    #[test]
    fn compilation_is_deterministic() {
        let first = compile(&gatehouse(), &catalog()).unwrap();
        let second = compile(&gatehouse(), &catalog()).unwrap();
        assert_eq!(first.to_ron().unwrap(), second.to_ron().unwrap());
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn reachability_preserved() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let mut seen = vec![false; table.node_count()];
        let mut stack = vec![NodeIndex::ENTRY];
        while let Some(n) = stack.pop() {
            if std::mem::replace(&mut seen[n.index()], true) {
                continue;
            }
            stack.extend(table.outgoing(n).map(|(_, e)| e.to));
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn invalid_graph_produces_no_table() {
        let mut g = gatehouse();
        g.remove_edge("e5").unwrap();
        match compile(&g, &catalog()) {
            Err(CompileError::InvalidGraph(findings)) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].node.as_str(), "o_open");
                assert_eq!(findings[0].kind, FindingKind::DanglingNode);
            }
            other => panic!("expected InvalidGraph, got {:?}", other),
        }
    }

    #[test]
    fn colliding_identifiers_rejected() {
        let mut g = gatehouse();
        g.remove_node("o_open").unwrap();
        g.add_node(Node::event("o_open", "gate opened")).unwrap();
        g.add_node(Node::event("o_open2", "Gate Opened")).unwrap();
        g.add_edge(Edge::new("e3", "n_ask", "o_open").with_label("Bribe")).unwrap();
        g.add_edge(Edge::new("e5", "o_open", "o_open2")).unwrap();
        g.add_edge(Edge::new("e6", "o_open2", "z_pass")).unwrap();
        match compile(&g, &catalog()) {
            Err(CompileError::DuplicateIdentifier {
                kind,
                key,
                first,
                second,
            }) => {
                assert_eq!(kind, IdentifierKind::Event);
                assert_eq!(key, "gateopened");
                assert_eq!(first, "gate opened");
                assert_eq!(second, "Gate Opened");
            }
            other => panic!("expected DuplicateIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn task_keys_come_from_node_ids() {
        let mut g = Graph::new("rats", GraphKind::Quest);
        g.add_node(Node::branch("start", "Rats!")).unwrap();
        g.add_node(Node::task("Kill Rats", TaskSpec::new("Kill", "Rat", 3))).unwrap();
        g.add_node(Node::branch("done", "Clear")).unwrap();
        g.add_edge(Edge::new("q1", "start", "Kill Rats")).unwrap();
        g.add_edge(Edge::new("q2", "Kill Rats", "done")).unwrap();
        g.set_entry("start").unwrap();
        g.mark_terminal("done", Outcome::Success).unwrap();

        let table = compile(&g, &ConditionCatalog::new()).unwrap();
        let index = table.task_index("killrats").unwrap();
        assert_eq!(table.task_index("KILL RATS"), Some(index));
        match &table.node(index).unwrap().payload {
            Payload::Task(task) => {
                assert_eq!(task.task_string, "kill_rat");
                assert_eq!(task.quantity, 3);
            }
            other => panic!("expected a task, got {:?}", other),
        }

        g.add_node(Node::task("killrats", TaskSpec::new("Kill", "Rat", 1))).unwrap();
        g.add_edge(Edge::new("q3", "start", "killrats")).unwrap();
        g.add_edge(Edge::new("q4", "killrats", "done")).unwrap();
        assert!(matches!(
            compile(&g, &ConditionCatalog::new()),
            Err(CompileError::DuplicateIdentifier {
                kind: IdentifierKind::Task,
                ..
            })
        ));
    }

    #[test]
    fn table_ron_round_trip() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let text = table.to_ron().unwrap();
        let reloaded = CompiledTable::from_ron(&text).unwrap();
        assert_eq!(table, reloaded);
    }

    #[test]
    fn tampered_table_rejected() {
        let table = compile(&gatehouse(), &catalog()).unwrap();
        let text = table.to_ron().unwrap().replace("Move along.", "Come in.");
        assert!(matches!(
            CompiledTable::from_ron(&text),
            Err(TableError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn tables_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledTable>();
    }
}

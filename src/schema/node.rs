use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::edge::{EdgeId, Guard};
use super::task::TaskSpec;

/// Stable identifier of an authored node. Survives edit sessions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node is, together with the data that kind of node carries.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A spoken line. One of `alternatives` may be played instead of `text`.
    Say {
        speaker: String,
        text: String,
        alternatives: Vec<String>,
    },
    /// A point where the player picks one of the outgoing edges.
    Choice { speaker: String, prompt: String },
    /// A quest step that holds until its task has been done often enough.
    Task(TaskSpec),
    /// A quest state: a journal update from which the quest branches.
    Branch { description: String },
    /// Fires an event at the host when entered.
    Event { event: String },
    /// Outgoing edges are only open while the guard holds.
    Gate(Guard),
}

impl NodeKind {
    pub fn tag(&self) -> NodeTag {
        match self {
            Self::Say { .. } => NodeTag::Say,
            Self::Choice { .. } => NodeTag::Choice,
            Self::Task(_) => NodeTag::Task,
            Self::Branch { .. } => NodeTag::Branch,
            Self::Event { .. } => NodeTag::Event,
            Self::Gate(_) => NodeTag::Gate,
        }
    }
}

/// Payload-free node kind, used in findings and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeTag {
    Say,
    Choice,
    Task,
    Branch,
    Event,
    Gate,
}

impl NodeTag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Say => "say",
            Self::Choice => "choice",
            Self::Task => "task",
            Self::Branch => "branch",
            Self::Event => "event",
            Self::Gate => "gate",
        }
    }

    /// Kinds only meaningful in dialogue graphs.
    pub fn is_dialogue_only(&self) -> bool {
        matches!(self, Self::Say | Self::Choice)
    }

    /// Kinds only meaningful in quest graphs.
    pub fn is_quest_only(&self) -> bool {
        matches!(self, Self::Task | Self::Branch)
    }
}

/// How a traversal ended when it reached a terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Outcome {
    #[default]
    Success,
    Failure,
}

/// An authored node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Events fired whenever the node is entered, whatever its kind.
    pub events: Vec<String>,
    /// Allowed to sit on a cycle in a quest graph.
    pub repeatable: bool,
    pub(crate) edges: Vec<EdgeId>,
}

impl Node {
    pub fn new(id: &str, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            kind,
            events: Vec::new(),
            repeatable: false,
            edges: Vec::new(),
        }
    }

    pub fn say(id: &str, speaker: &str, text: &str) -> Self {
        Self::new(
            id,
            NodeKind::Say {
                speaker: speaker.to_string(),
                text: text.to_string(),
                alternatives: Vec::new(),
            },
        )
    }

    pub fn choice(id: &str, speaker: &str, prompt: &str) -> Self {
        Self::new(
            id,
            NodeKind::Choice {
                speaker: speaker.to_string(),
                prompt: prompt.to_string(),
            },
        )
    }

    pub fn task(id: &str, task: TaskSpec) -> Self {
        Self::new(id, NodeKind::Task(task))
    }

    pub fn branch(id: &str, description: &str) -> Self {
        Self::new(
            id,
            NodeKind::Branch {
                description: description.to_string(),
            },
        )
    }

    pub fn event(id: &str, event: &str) -> Self {
        Self::new(
            id,
            NodeKind::Event {
                event: event.to_string(),
            },
        )
    }

    pub fn gate(id: &str, guard: Guard) -> Self {
        Self::new(id, NodeKind::Gate(guard))
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    /// Outgoing edge ids, in declared order.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn tag(&self) -> NodeTag {
        self.kind.tag()
    }
}

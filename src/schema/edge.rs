use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::node::NodeId;

/// Stable identifier of an authored edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EdgeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to a host condition. With `negate` set the guard holds
/// while the condition is false.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guard {
    pub condition: String,
    #[serde(default)]
    pub negate: bool,
}

impl Guard {
    pub fn new(condition: &str) -> Self {
        Self {
            condition: condition.to_string(),
            negate: false,
        }
    }

    pub fn negated(condition: &str) -> Self {
        Self {
            condition: condition.to_string(),
            negate: true,
        }
    }
}

/// A directed edge between two authored nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub guard: Option<Guard>,
    /// Higher priorities are offered first; absent counts as 0.
    pub priority: Option<i32>,
    /// Text shown for this option when leaving a choice.
    pub label: Option<String>,
}

impl Edge {
    pub fn new(id: &str, from: &str, to: &str) -> Self {
        Self {
            id: EdgeId::new(id),
            from: NodeId::new(from),
            to: NodeId::new(to),
            guard: None,
            priority: None,
            label: None,
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_builder() {
        let edge = Edge::new("e1", "ask", "accept")
            .with_guard(Guard::negated("is_hostile"))
            .with_priority(5)
            .with_label("Sure.");
        assert_eq!(edge.from, NodeId::new("ask"));
        assert_eq!(edge.to.as_str(), "accept");
        assert_eq!(edge.guard, Some(Guard { condition: "is_hostile".to_string(), negate: true }));
        assert_eq!(edge.priority, Some(5));
        assert_eq!(edge.label.as_deref(), Some("Sure."));
    }

    #[test]
    fn guard_ron_defaults_negate() {
        let guard: Guard = ron::from_str(r#"(condition: "has_key")"#).unwrap();
        assert_eq!(guard, Guard::new("has_key"));
    }
}

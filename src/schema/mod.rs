//! Authoring-time graph model: nodes, edges, tasks and whole graphs.

pub mod edge;
pub mod graph;
pub mod node;
pub mod task;

/// Normalize an external identifier (task key, event or condition name)
/// for lookup: lowercase, whitespace removed.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_case() {
        assert_eq!(normalize_key("Talk To Character_Bob"), "talktocharacter_bob");
        assert_eq!(normalize_key("  has_key "), "has_key");
        assert_eq!(normalize_key(""), "");
    }
}

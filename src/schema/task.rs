use super::normalize_key;

/// Something the player has to do, possibly several times, before a quest
/// can move past the task node that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Short task name, e.g. "Talk To Character".
    pub name: String,
    /// What the task applies to, e.g. "Bob".
    pub argument: String,
    /// How many times the task must be reported before it counts as done.
    pub quantity: u32,
    /// Optional tasks never hold the quest back.
    pub optional: bool,
    /// Hidden tasks are part of the quest logic but not shown in a journal.
    pub hidden: bool,
    /// Reports made earlier in the walk count once the task is reached.
    pub retroactive: bool,
    pub description: String,
}

impl TaskSpec {
    pub fn new(name: &str, argument: &str, quantity: u32) -> Self {
        Self {
            name: name.to_string(),
            argument: argument.to_string(),
            quantity,
            optional: false,
            hidden: false,
            retroactive: false,
            description: String::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn retroactive(mut self) -> Self {
        self.retroactive = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// The string gameplay code reports when the player does this task.
    pub fn task_string(&self) -> String {
        make_task_string(&self.name, &self.argument)
    }
}

/// Build a task string: name and argument joined by `_`, lowercased, with
/// whitespace removed ("Talk To Character", "Bob" -> "talktocharacter_bob").
pub fn make_task_string(name: &str, argument: &str) -> String {
    normalize_key(&format!("{}_{}", name, argument))
}

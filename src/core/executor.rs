//! Walks a compiled table during gameplay.
//!
//! The executor itself is stateless apart from its settings: every walk
//! lives in an `ExecutorState` owned by the caller, so one table can drive
//! any number of conversations or quests at once. Every fallible operation
//! either succeeds completely or leaves the state untouched.

use indexmap::IndexSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

use crate::core::host::{ConditionSource, EventSink};
use crate::core::settings::NarrativeSettings;
use crate::core::table::{
    CompiledNode, CompiledTable, EdgeIndex, EventIndex, NodeIndex, Payload,
};
use crate::schema::node::Outcome;
use crate::schema::normalize_key;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("edge {0:?} is not available from the current node")]
    InvalidTransition(EdgeIndex),
    #[error("traversal already ended at terminal node {0:?}")]
    TerminalReached(NodeIndex),
    #[error("node {0:?} is not a task")]
    UnknownTask(NodeIndex),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("state belongs to another table (fingerprint {found:#x}, expected {expected:#x})")]
    ForeignState { expected: u64, found: u64 },
}

/// Progress of one walk through a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorState {
    pub(crate) fingerprint: u64,
    pub(crate) current: NodeIndex,
    pub(crate) visited: IndexSet<NodeIndex>,
    pub(crate) task_progress: BTreeMap<NodeIndex, u32>,
    /// Every task string ever reported on this walk, with its total.
    pub(crate) task_log: BTreeMap<String, u32>,
    pub(crate) pending_events: VecDeque<EventIndex>,
    pub(crate) steps: u64,
}

impl ExecutorState {
    fn start(table: &CompiledTable, at: NodeIndex, node: &CompiledNode) -> Self {
        let mut state = Self {
            fingerprint: table.fingerprint(),
            current: at,
            visited: IndexSet::new(),
            task_progress: BTreeMap::new(),
            task_log: BTreeMap::new(),
            pending_events: VecDeque::new(),
            steps: 0,
        };
        state.enter(at, node);
        state
    }

    /// Make `node` current: queue its events and let a retroactive task
    /// count reports made before the walk got here.
    fn enter(&mut self, index: NodeIndex, node: &CompiledNode) {
        self.current = index;
        match &node.payload {
            Payload::Event { event } => self.pending_events.push_back(*event),
            Payload::Task(task) if task.retroactive => {
                let earlier = self
                    .task_log
                    .get(&task.task_string)
                    .copied()
                    .unwrap_or(0)
                    .min(task.quantity);
                let progress = self.task_progress.get(&index).copied().unwrap_or(0);
                if earlier > progress {
                    self.task_progress.insert(index, earlier);
                }
            }
            _ => {}
        }
        self.pending_events.extend(node.events.iter().copied());
    }

    pub fn current(&self) -> NodeIndex {
        self.current
    }

    /// Fingerprint of the table this state was started on.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Number of transitions taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Events queued but not yet dispatched, oldest first.
    pub fn pending_events(&self) -> impl Iterator<Item = EventIndex> + '_ {
        self.pending_events.iter().copied()
    }
}

/// What the host should present for the current node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub node: NodeIndex,
    pub id: String,
    pub view: NodeView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeView {
    Line {
        speaker: String,
        text: String,
    },
    Choice {
        speaker: String,
        prompt: String,
    },
    Task {
        key: String,
        description: String,
        progress: u32,
        quantity: u32,
        hidden: bool,
        optional: bool,
    },
    Branch {
        description: String,
    },
    Event {
        event: String,
    },
    Gate {
        condition: String,
        negate: bool,
    },
}

/// An edge the walk may currently take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub edge: EdgeIndex,
    pub to: NodeIndex,
    pub label: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Moved(Observation),
    Finished {
        observation: Observation,
        outcome: Outcome,
    },
}

impl Advance {
    pub fn observation(&self) -> &Observation {
        match self {
            Self::Moved(observation) | Self::Finished { observation, .. } => observation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    pub task: NodeIndex,
    pub progress: u32,
    pub quantity: u32,
    pub completed: bool,
    /// This call is the one that completed the task.
    pub newly_completed: bool,
}

pub struct Executor<'t> {
    table: &'t CompiledTable,
    settings: NarrativeSettings,
}

impl<'t> Executor<'t> {
    pub fn new(table: &'t CompiledTable) -> Self {
        Self::with_settings(table, NarrativeSettings::default())
    }

    pub fn with_settings(table: &'t CompiledTable, settings: NarrativeSettings) -> Self {
        Self { table, settings }
    }

    pub fn table(&self) -> &'t CompiledTable {
        self.table
    }

    pub fn settings(&self) -> &NarrativeSettings {
        &self.settings
    }

    /// Start a walk at the entry node.
    pub fn activate(&self) -> (ExecutorState, Observation) {
        let entry = self.table.entry();
        let state = ExecutorState::start(self.table, NodeIndex::ENTRY, entry);
        let observation = self.view(&state, NodeIndex::ENTRY, entry);
        (state, observation)
    }

    /// Start a walk at a named node instead of the entry.
    pub fn activate_at(&self, node_id: &str) -> Result<(ExecutorState, Observation), ExecutorError> {
        let (index, node) = self
            .table
            .node_index(node_id)
            .and_then(|i| self.table.node(i).map(|n| (i, n)))
            .ok_or_else(|| ExecutorError::UnknownNode(node_id.to_string()))?;
        let state = ExecutorState::start(self.table, index, node);
        let observation = self.view(&state, index, node);
        Ok((state, observation))
    }

    fn check(&self, state: &ExecutorState) -> Result<&'t CompiledNode, ExecutorError> {
        let foreign = ExecutorError::ForeignState {
            expected: self.table.fingerprint(),
            found: state.fingerprint,
        };
        if state.fingerprint != self.table.fingerprint() {
            return Err(foreign);
        }
        self.table.node(state.current).ok_or(foreign)
    }

    /// Edges that can be taken right now, in offer order.
    pub fn available_transitions<C>(
        &self,
        state: &ExecutorState,
        conditions: &C,
    ) -> Result<Vec<Transition>, ExecutorError>
    where
        C: ConditionSource + ?Sized,
    {
        let node = self.check(state)?;
        if node.terminal.is_some() || !self.node_open(state, node, conditions) {
            return Ok(Vec::new());
        }
        Ok(self
            .table
            .outgoing(state.current)
            .filter(|(_, edge)| edge.guard.map_or(true, |g| g.holds(conditions)))
            .map(|(index, edge)| Transition {
                edge: index,
                to: edge.to,
                label: edge.label.clone(),
                priority: edge.priority,
            })
            .collect())
    }

    /// Whether the node itself lets the walk leave, before edge guards.
    fn node_open<C>(&self, state: &ExecutorState, node: &CompiledNode, conditions: &C) -> bool
    where
        C: ConditionSource + ?Sized,
    {
        match &node.payload {
            Payload::Task(task) => {
                task.optional || self.progress_of(state, state.current) >= task.quantity
            }
            Payload::Gate(guard) => guard.holds(conditions),
            _ => true,
        }
    }

    /// Take `edge` from the current node.
    pub fn advance<C>(
        &self,
        state: &mut ExecutorState,
        edge: EdgeIndex,
        conditions: &C,
    ) -> Result<Advance, ExecutorError>
    where
        C: ConditionSource + ?Sized,
    {
        let node = self.check(state)?;
        if node.terminal.is_some() {
            return Err(ExecutorError::TerminalReached(state.current));
        }
        let transition = self
            .available_transitions(state, conditions)?
            .into_iter()
            .find(|t| t.edge == edge)
            .ok_or(ExecutorError::InvalidTransition(edge))?;
        let destination = self
            .table
            .node(transition.to)
            .ok_or(ExecutorError::InvalidTransition(edge))?;

        let left = state.current;
        state.visited.insert(left);
        if self.settings.reset_tasks_when_completed && matches!(node.payload, Payload::Task(_)) {
            state.task_progress.remove(&left);
        }
        state.steps += 1;
        state.enter(transition.to, destination);

        tracing::debug!(
            "Graph '{}': '{}' -> '{}'",
            self.table.graph_id(),
            node.id,
            destination.id
        );

        let observation = self.view(state, transition.to, destination);
        Ok(match destination.terminal {
            Some(outcome) => {
                tracing::debug!(
                    "Graph '{}' finished at '{}' with {:?}",
                    self.table.graph_id(),
                    destination.id,
                    outcome
                );
                Advance::Finished {
                    observation,
                    outcome,
                }
            }
            None => Advance::Moved(observation),
        })
    }

    /// Add `amount` to a task's counter, saturating at its quantity.
    pub fn progress_task(
        &self,
        state: &mut ExecutorState,
        task: NodeIndex,
        amount: u32,
    ) -> Result<TaskProgress, ExecutorError> {
        self.check(state)?;
        let quantity = match self.table.node(task).map(|n| &n.payload) {
            Some(Payload::Task(spec)) => spec.quantity,
            _ => return Err(ExecutorError::UnknownTask(task)),
        };
        let before = self.progress_of(state, task);
        let progress = before.saturating_add(amount).min(quantity);
        state.task_progress.insert(task, progress);
        Ok(TaskProgress {
            task,
            progress,
            quantity,
            completed: progress >= quantity,
            newly_completed: progress >= quantity && before < quantity,
        })
    }

    /// Report that the player did something. The report always goes into
    /// the walk's task log, where retroactive tasks reached later will find
    /// it. It also progresses the current node when that is a task with a
    /// matching task string.
    pub fn record_task(
        &self,
        state: &mut ExecutorState,
        task_string: &str,
        amount: u32,
    ) -> Result<Option<TaskProgress>, ExecutorError> {
        let node = self.check(state)?;
        let key = normalize_key(task_string);
        let current = state.current;
        let progress = match &node.payload {
            Payload::Task(task) if task.task_string == key => {
                Some(self.progress_task(state, current, amount)?)
            }
            _ => None,
        };
        if amount > 0 {
            let total = state.task_log.entry(key).or_insert(0);
            *total = total.saturating_add(amount);
        }
        Ok(progress)
    }

    /// How many times `task_string` has been reported on this walk.
    pub fn times_reported(&self, state: &ExecutorState, task_string: &str) -> Result<u32, ExecutorError> {
        self.check(state)?;
        Ok(state
            .task_log
            .get(&normalize_key(task_string))
            .copied()
            .unwrap_or(0))
    }

    pub fn task_index(&self, key: &str) -> Option<NodeIndex> {
        self.table.task_index(key)
    }

    pub fn is_terminal(&self, state: &ExecutorState) -> Result<bool, ExecutorError> {
        Ok(self.outcome(state)?.is_some())
    }

    /// Outcome of the terminal node the walk ended on, if it has ended.
    pub fn outcome(&self, state: &ExecutorState) -> Result<Option<Outcome>, ExecutorError> {
        Ok(self.check(state)?.terminal)
    }

    /// Nodes the walk has left, in first-visit order.
    pub fn visited<'s>(
        &self,
        state: &'s ExecutorState,
    ) -> Result<impl Iterator<Item = NodeIndex> + 's, ExecutorError> {
        self.check(state)?;
        Ok(state.visited.iter().copied())
    }

    /// Whether the walk has already passed through `node`.
    pub fn has_visited(&self, state: &ExecutorState, node: NodeIndex) -> Result<bool, ExecutorError> {
        self.check(state)?;
        Ok(state.visited.contains(&node))
    }

    pub fn task_progress(&self, state: &ExecutorState, task: NodeIndex) -> Result<u32, ExecutorError> {
        self.check(state)?;
        Ok(self.progress_of(state, task))
    }

    fn progress_of(&self, state: &ExecutorState, task: NodeIndex) -> u32 {
        state.task_progress.get(&task).copied().unwrap_or(0)
    }

    /// Re-read the current node.
    pub fn observe(&self, state: &ExecutorState) -> Result<Observation, ExecutorError> {
        let node = self.check(state)?;
        Ok(self.view(state, state.current, node))
    }

    /// Drain queued events to `sink` in the order they were fired.
    pub fn dispatch_events<S>(&self, state: &mut ExecutorState, sink: &mut S) -> Result<usize, ExecutorError>
    where
        S: EventSink + ?Sized,
    {
        self.check(state)?;
        let mut dispatched = 0;
        while let Some(event) = state.pending_events.pop_front() {
            if let Some(name) = self.table.event_name(event) {
                sink.dispatch(event, name);
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    fn view(&self, state: &ExecutorState, index: NodeIndex, node: &CompiledNode) -> Observation {
        let view = match &node.payload {
            Payload::Say {
                speaker,
                text,
                alternatives,
            } => NodeView::Line {
                speaker: speaker.clone(),
                text: self.pick_line(state, index, text, alternatives).to_string(),
            },
            Payload::Choice { speaker, prompt } => NodeView::Choice {
                speaker: speaker.clone(),
                prompt: prompt.clone(),
            },
            Payload::Task(task) => NodeView::Task {
                key: task.key.clone(),
                description: task.description.clone(),
                progress: self.progress_of(state, index),
                quantity: task.quantity,
                hidden: task.hidden,
                optional: task.optional,
            },
            Payload::Branch { description } => NodeView::Branch {
                description: description.clone(),
            },
            Payload::Event { event } => NodeView::Event {
                event: self.table.event_name(*event).unwrap_or_default().to_string(),
            },
            Payload::Gate(guard) => NodeView::Gate {
                condition: self
                    .table
                    .condition_name(guard.condition)
                    .unwrap_or_default()
                    .to_string(),
                negate: guard.negate,
            },
        };
        Observation {
            node: index,
            id: node.id.clone(),
            view,
        }
    }

    /// Main text or one of its alternatives, fixed for a given seed, step
    /// and node so a reloaded state shows the same line.
    fn pick_line<'a>(
        &self,
        state: &ExecutorState,
        index: NodeIndex,
        text: &'a str,
        alternatives: &'a [String],
    ) -> &'a str {
        if alternatives.is_empty() {
            return text;
        }
        let seed = self
            .settings
            .line_seed
            .wrapping_add(state.steps)
            .wrapping_add(index.0 as u64 * 7919);
        let mut rng = StdRng::seed_from_u64(seed);
        match rng.gen_range(0..=alternatives.len()) {
            0 => text,
            n => alternatives[n - 1].as_str(),
        }
    }
}

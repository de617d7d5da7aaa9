//! Narrow capabilities the host game hands to the core: which conditions
//! exist, which currently hold, and where fired events go.

use rustc_hash::FxHashSet;
use std::path::Path;

use crate::core::table::{CompiledTable, ConditionIndex, EventIndex};
use crate::schema::graph::SchemaError;
use crate::schema::normalize_key;

/// The set of condition identifiers the host knows how to evaluate.
/// Validation reports any guard that names something outside it.
#[derive(Debug, Clone, Default)]
pub struct ConditionCatalog {
    known: FxHashSet<String>,
}

impl ConditionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::new();
        for name in names {
            catalog.insert(name.as_ref());
        }
        catalog
    }

    pub fn insert(&mut self, name: &str) {
        self.known.insert(normalize_key(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(&normalize_key(name))
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Merge another catalog into this one.
    pub fn merge(&mut self, other: ConditionCatalog) {
        self.known.extend(other.known);
    }

    /// Parse a catalog from a RON list of names: `["has_key", "is_night"]`.
    pub fn parse_ron(input: &str) -> Result<ConditionCatalog, SchemaError> {
        let names: Vec<String> = ron::from_str(input)?;
        Ok(Self::from_names(names))
    }

    pub fn load_from_ron(path: &Path) -> Result<ConditionCatalog, SchemaError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }
}

/// Live condition state, queried by index while walking a table.
pub trait ConditionSource {
    fn is_met(&self, condition: ConditionIndex) -> bool;
}

impl<F> ConditionSource for F
where
    F: Fn(ConditionIndex) -> bool,
{
    fn is_met(&self, condition: ConditionIndex) -> bool {
        self(condition)
    }
}

/// A flag per condition of one table, set by name.
#[derive(Debug, Clone)]
pub struct ConditionFlags<'t> {
    table: &'t CompiledTable,
    flags: Vec<bool>,
}

impl<'t> ConditionFlags<'t> {
    /// All conditions start false.
    pub fn new(table: &'t CompiledTable) -> Self {
        Self {
            table,
            flags: vec![false; table.conditions().len()],
        }
    }

    /// Returns false if the table has no such condition.
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        match self.table.condition_index(name) {
            Some(index) => {
                self.flags[index.index()] = value;
                true
            }
            None => {
                tracing::debug!(
                    "Condition '{}' is not used by graph '{}'",
                    name,
                    self.table.graph_id()
                );
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> bool {
        self.table
            .condition_index(name)
            .is_some_and(|index| self.is_met(index))
    }
}

impl ConditionSource for ConditionFlags<'_> {
    fn is_met(&self, condition: ConditionIndex) -> bool {
        self.flags.get(condition.index()).copied().unwrap_or(false)
    }
}

/// Receives events as the executor drains them.
pub trait EventSink {
    fn dispatch(&mut self, event: EventIndex, name: &str);
}

impl<F> EventSink for F
where
    F: FnMut(EventIndex, &str),
{
    fn dispatch(&mut self, event: EventIndex, name: &str) {
        self(event, name)
    }
}

/// Collects event names, mostly useful in tests and tools.
impl EventSink for Vec<String> {
    fn dispatch(&mut self, _event: EventIndex, name: &str) {
        self.push(name.to_string());
    }
}

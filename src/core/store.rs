//! Save and restore executor states.
//!
//! A saved state is a flat RON record stamped with the format version and
//! the identity of the table it was taken on. Loading refuses records taken
//! on a different graph, version or table content, since node indices are
//! only meaningful for the exact table that produced them.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use thiserror::Error;

use crate::core::executor::ExecutorState;
use crate::core::table::{CompiledTable, EventIndex, NodeIndex, Payload};

/// Version of the saved record layout. Version 1 records predate the task
/// log and still load, with an empty log.
pub const STATE_FORMAT_VERSION: u32 = 2;

fn format_supported(format: u32) -> bool {
    (1..=STATE_FORMAT_VERSION).contains(&format)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "saved state is for graph '{graph_id}' v{version} ({fingerprint:#x}), not the loaded table"
    )]
    StaleState {
        graph_id: String,
        version: u32,
        fingerprint: u64,
    },
    #[error("unsupported saved state format {0}")]
    UnsupportedFormat(u32),
    #[error("corrupt saved state: {0}")]
    Corrupt(String),
    #[error("state was not started on this table")]
    ForeignState,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonSerialize(#[from] ron::Error),
}

/// The on-disk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub format: u32,
    pub graph_id: String,
    pub graph_version: u32,
    pub fingerprint: u64,
    pub current: NodeIndex,
    pub visited: Vec<NodeIndex>,
    pub task_progress: Vec<(NodeIndex, u32)>,
    #[serde(default)]
    pub task_log: Vec<(String, u32)>,
    pub pending_events: Vec<EventIndex>,
    pub steps: u64,
}

#[derive(Deserialize)]
struct FormatHeader {
    format: u32,
}

pub struct StateStore;

impl StateStore {
    /// Build the record for `state`.
    pub fn snapshot(state: &ExecutorState, table: &CompiledTable) -> Result<SavedState, StoreError> {
        if state.fingerprint != table.fingerprint() {
            return Err(StoreError::ForeignState);
        }
        Ok(SavedState {
            format: STATE_FORMAT_VERSION,
            graph_id: table.graph_id().to_string(),
            graph_version: table.version(),
            fingerprint: table.fingerprint(),
            current: state.current,
            visited: state.visited.iter().copied().collect(),
            task_progress: state
                .task_progress
                .iter()
                .map(|(task, progress)| (*task, *progress))
                .collect(),
            task_log: state
                .task_log
                .iter()
                .map(|(task, count)| (task.clone(), *count))
                .collect(),
            pending_events: state.pending_events.iter().copied().collect(),
            steps: state.steps,
        })
    }

    /// Turn a record back into a state for `table`, checking that it
    /// belongs there and that every index is in range.
    pub fn restore(saved: SavedState, table: &CompiledTable) -> Result<ExecutorState, StoreError> {
        if !format_supported(saved.format) {
            return Err(StoreError::UnsupportedFormat(saved.format));
        }
        if saved.graph_id != table.graph_id()
            || saved.graph_version != table.version()
            || saved.fingerprint != table.fingerprint()
        {
            tracing::warn!(
                "Refusing stale state for graph '{}' v{} (table is '{}' v{})",
                saved.graph_id,
                saved.graph_version,
                table.graph_id(),
                table.version()
            );
            return Err(StoreError::StaleState {
                graph_id: saved.graph_id,
                version: saved.graph_version,
                fingerprint: saved.fingerprint,
            });
        }

        let in_table = |n: NodeIndex| n.index() < table.node_count();
        if !in_table(saved.current) {
            return Err(StoreError::Corrupt(format!(
                "current node {} out of range",
                saved.current.0
            )));
        }
        let visited: IndexSet<NodeIndex> = saved.visited.iter().copied().collect();
        if visited.len() != saved.visited.len() || !visited.iter().all(|n| in_table(*n)) {
            return Err(StoreError::Corrupt("invalid visited set".to_string()));
        }
        for (task, progress) in &saved.task_progress {
            let quantity = match table.node(*task).map(|n| &n.payload) {
                Some(Payload::Task(spec)) => spec.quantity,
                _ => {
                    return Err(StoreError::Corrupt(format!(
                        "progress recorded for non-task node {}",
                        task.0
                    )))
                }
            };
            if *progress > quantity {
                return Err(StoreError::Corrupt(format!(
                    "task progress {} exceeds quantity {}",
                    progress, quantity
                )));
            }
        }
        if !saved
            .pending_events
            .iter()
            .all(|e| e.index() < table.events().len())
        {
            return Err(StoreError::Corrupt("unknown pending event".to_string()));
        }
        let task_log: BTreeMap<String, u32> = saved.task_log.into_iter().collect();

        Ok(ExecutorState {
            fingerprint: saved.fingerprint,
            current: saved.current,
            visited,
            task_progress: saved.task_progress.into_iter().collect(),
            task_log,
            pending_events: saved.pending_events.into_iter().collect(),
            steps: saved.steps,
        })
    }

    pub fn save<W: Write>(
        state: &ExecutorState,
        table: &CompiledTable,
        mut writer: W,
    ) -> Result<(), StoreError> {
        let saved = Self::snapshot(state, table)?;
        let text = ron::ser::to_string_pretty(&saved, ron::ser::PrettyConfig::default())?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn load<R: Read>(mut reader: R, table: &CompiledTable) -> Result<ExecutorState, StoreError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text, table)
    }

    /// Compact encoding for replication buffers.
    pub fn to_bytes(state: &ExecutorState, table: &CompiledTable) -> Result<Vec<u8>, StoreError> {
        let saved = Self::snapshot(state, table)?;
        Ok(ron::to_string(&saved)?.into_bytes())
    }

    pub fn from_bytes(bytes: &[u8], table: &CompiledTable) -> Result<ExecutorState, StoreError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::Corrupt(format!("not UTF-8: {}", e)))?;
        Self::parse(text, table)
    }

    /// Abandon a state. Nothing is kept anywhere, so this only drops it.
    pub fn discard(state: ExecutorState) {
        tracing::debug!("Discarding state at node {} after {} steps", state.current.0, state.steps);
    }

    fn parse(text: &str, table: &CompiledTable) -> Result<ExecutorState, StoreError> {
        // Read the version alone first so newer layouts fail cleanly.
        let header: FormatHeader = ron::from_str(text)?;
        if !format_supported(header.format) {
            return Err(StoreError::UnsupportedFormat(header.format));
        }
        let saved: SavedState = ron::from_str(text)?;
        Self::restore(saved, table)
    }
}

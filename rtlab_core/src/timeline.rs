//! Append-only history of engine snapshots.
//!
//! Index 0 is always the initial state. Every later entry records the action
//! (if any) and the event that produced it, so a presentation layer can show
//! "what just happened" at any position without re-running the engine.

use crate::engine::Engine;
use crate::error::{Misuse, SimResult};
use serde::{Deserialize, Serialize};

/// One recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S, A, V> {
    pub index: usize,
    pub state: S,
    /// `None` only for index 0
    pub event: Option<V>,
    /// Action applied on this step; `None` for ticks
    pub action: Option<A>,
    /// Scripted actions consumed up to and including this step
    pub script_cursor: usize,
}

/// Snapshot type recorded for engine `E`.
pub type EngineSnapshot<E> =
    Snapshot<<E as Engine>::State, <E as Engine>::Action, <E as Engine>::Event>;

/// Timeline type recorded for engine `E`.
pub type EngineTimeline<E> =
    Timeline<<E as Engine>::State, <E as Engine>::Action, <E as Engine>::Event>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline<S, A, V> {
    entries: Vec<Snapshot<S, A, V>>,
}

impl<S, A, V> Default for Timeline<S, A, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S, A, V> Timeline<S, A, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next snapshot. Its index must equal the current length.
    pub fn append(&mut self, snapshot: Snapshot<S, A, V>) -> SimResult<()> {
        if snapshot.index != self.entries.len() {
            return Err(Misuse::IndexOutOfRange {
                index: snapshot.index,
                len: self.entries.len(),
            }
            .into());
        }
        self.entries.push(snapshot);
        Ok(())
    }

    pub fn at(&self, index: usize) -> Option<&Snapshot<S, A, V>> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest snapshot.
    pub fn tip(&self) -> Option<&Snapshot<S, A, V>> {
        self.entries.last()
    }

    /// Index of the latest snapshot.
    pub fn tip_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    /// Drops every snapshot after `index`.
    pub fn truncate_after(&mut self, index: usize) {
        self.entries.truncate(index.saturating_add(1));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot<S, A, V>> {
        self.entries.iter()
    }
}

//! In-memory ledger store.

use crate::error::Result;

use super::{ChangeSet, LedgerState, LedgerStore};

/// Volatile store backed by a [`LedgerState`] in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: LedgerState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state (e.g. one loaded elsewhere).
    pub fn from_state(state: LedgerState) -> Self {
        Self { state }
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }
}

impl LedgerStore for MemoryStore {
    fn state(&self) -> &LedgerState {
        &self.state
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<()> {
        self.state.apply(changes);
        Ok(())
    }
}

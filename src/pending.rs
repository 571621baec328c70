use crate::graph::LinkKey;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// An entity an optimistic edit is in flight for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditKey {
    Task(String),
    Dependency(LinkKey),
}

impl EditKey {
    fn overlaps(&self, other: &EditKey) -> bool {
        match (self, other) {
            (EditKey::Task(a), EditKey::Task(b)) => a == b,
            (EditKey::Dependency(a), EditKey::Dependency(b)) => a == b,
            (EditKey::Task(t), EditKey::Dependency(d)) | (EditKey::Dependency(d), EditKey::Task(t)) => {
                d.touches(t)
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            EditKey::Task(t) => t.clone(),
            EditKey::Dependency(d) => format!("{} - {}", d.low, d.high),
        }
    }
}

/// Registry of unconfirmed edits. At most one edit per entity is in flight;
/// an edit to a task also blocks edits to links touching it and vice versa.
#[derive(Debug, Default)]
pub struct PendingEdits {
    inflight: Mutex<HashSet<EditKey>>,
}

/// Holds a claim until dropped.
#[derive(Debug)]
pub struct PendingGuard {
    owner: Arc<PendingEdits>,
    keys: Vec<EditKey>,
}

impl PendingEdits {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims every key or none. On conflict returns the first key that is
    /// already taken.
    pub fn claim(self: &Arc<Self>, keys: Vec<EditKey>) -> Result<PendingGuard, EditKey> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        for key in &keys {
            if inflight.iter().any(|held| held.overlaps(key)) {
                return Err(key.clone());
            }
        }
        for key in &keys {
            inflight.insert(key.clone());
        }
        debug!(?keys, "claimed pending edit");
        Ok(PendingGuard {
            owner: Arc::clone(self),
            keys,
        })
    }

    pub fn is_pending(&self, key: &EditKey) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|held| held.overlaps(key))
    }

    pub fn task_pending(&self, name: &str) -> bool {
        self.is_pending(&EditKey::Task(name.to_string()))
    }

    pub fn dependency_pending(&self, key: &LinkKey) -> bool {
        self.is_pending(&EditKey::Dependency(key.clone()))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut inflight = self
            .owner
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            inflight.remove(key);
        }
    }
}

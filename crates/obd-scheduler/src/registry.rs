//! Ordered, duplicate-free set of PIDs selected for polling

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a poll list mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryChange {
    Added(u8),
    /// `add` of an id already in the list; nothing changed
    AlreadyPresent(u8),
    Removed(u8),
    /// `remove` of an id not in the list; nothing changed
    NotPresent(u8),
}

impl RegistryChange {
    /// True when the list was modified
    pub fn is_applied(&self) -> bool {
        matches!(self, RegistryChange::Added(_) | RegistryChange::Removed(_))
    }
}

impl fmt::Display for RegistryChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryChange::Added(id) => write!(f, "Added id {} to Poll List", id),
            RegistryChange::AlreadyPresent(id) => {
                write!(f, "Could not add id {} to Poll List: already there...", id)
            }
            RegistryChange::Removed(id) => write!(f, "Removed id {} from Poll List", id),
            RegistryChange::NotPresent(id) => {
                write!(f, "Could not remove id {} from Poll List: not there...", id)
            }
        }
    }
}

/// PIDs polled by the poller, iterated in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollRegistry {
    pids: IndexSet<u8>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pid` unless it is already registered
    pub fn add(&mut self, pid: u8) -> RegistryChange {
        if self.pids.insert(pid) {
            RegistryChange::Added(pid)
        } else {
            RegistryChange::AlreadyPresent(pid)
        }
    }

    /// Remove `pid`, keeping the order of the others
    pub fn remove(&mut self, pid: u8) -> RegistryChange {
        if self.pids.shift_remove(&pid) {
            RegistryChange::Removed(pid)
        } else {
            RegistryChange::NotPresent(pid)
        }
    }

    pub fn contains(&self, pid: u8) -> bool {
        self.pids.contains(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.pids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

impl FromIterator<u8> for PollRegistry {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self {
            pids: iter.into_iter().collect(),
        }
    }
}

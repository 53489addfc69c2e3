use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sinks::HistorySink;
use crate::types::ExerciseMode;

/// A finalized record of one completed session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: ExerciseMode,
    pub reps: u32,
}

impl HistoryEntry {
    pub fn new(mode: ExerciseMode, reps: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            mode,
            reps,
        }
    }
}

/// Append-only session log, presented newest-first.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the front. Zero-rep entries are rejected: sessions
    /// without counted repetitions leave no history.
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.reps == 0 {
            warn!("discarding zero-rep history entry");
            return;
        }
        self.entries.push_front(entry);
    }

    /// Entries newest-first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Shared handle to the history log: the session tracker records through it
/// while the console reads it back.
#[derive(Clone, Default)]
pub struct SharedHistoryLog {
    inner: Arc<Mutex<HistoryLog>>,
}

impl SharedHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        match self.inner.lock() {
            Ok(log) => log.entries().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.inner.lock() {
            log.clear();
        }
    }
}

impl HistorySink for SharedHistoryLog {
    fn record(&self, entry: HistoryEntry) {
        if let Ok(mut log) = self.inner.lock() {
            log.record(entry);
        }
    }
}

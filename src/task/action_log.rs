//! Session-wide action log kept across tasks.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;

use crate::agent::ProgressEvent;

/// Default number of entries kept in memory.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Number of entries shown by a log view.
pub const RECENT_LOG_ENTRIES: usize = 50;

/// Bounded history of progress entries from every task of a session.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ProgressEvent>,
    max_entries: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Append an entry, dropping the oldest one when full.
    pub fn record(&mut self, event: ProgressEvent) {
        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ProgressEvent> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
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

    /// All entries in file format, one per line.
    pub fn format_all(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.format_file())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write every entry to `path`. Returns the number of entries written.
    pub fn export(&self, path: &Path) -> io::Result<usize> {
        let mut content = self.format_all();
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(path, content)?;
        tracing::info!(path = %path.display(), entries = self.entries.len(), "Action log exported");
        Ok(self.entries.len())
    }
}

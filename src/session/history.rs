//! Command History
//!
//! Bounded, insertion-ordered list of submitted commands. Only adjacent
//! duplicates are suppressed; the same command may appear several times as
//! long as something else was submitted in between.

use std::collections::VecDeque;

use crate::config::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    /// Oldest first
    entries: VecDeque<String>,
    max_size: usize,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_LIMIT)
    }

    /// A bound of zero is treated as one
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Rebuild from persisted entries (oldest first), keeping the newest `max_size`
    pub fn from_entries(entries: impl IntoIterator<Item = String>, max_size: usize) -> Self {
        let mut log = Self::with_capacity(max_size);
        for entry in entries {
            log.append(&entry);
        }
        log
    }

    /// Record a command; returns whether it was stored
    pub fn append(&mut self, cmd: &str) -> bool {
        if cmd.is_empty() {
            return false;
        }
        if self.entries.back().map(String::as_str) == Some(cmd) {
            return false;
        }

        self.entries.push_back(cmd.to_string());
        if self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
        true
    }

    /// Entry counted back from the most recent (0 = newest)
    pub fn get(&self, index_from_most_recent: usize) -> Option<&str> {
        let len = self.entries.len();
        if index_from_most_recent >= len {
            return None;
        }
        self.entries
            .get(len - 1 - index_from_most_recent)
            .map(String::as_str)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entries oldest first, as persisted
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Up/down recall position over a [`HistoryLog`]
///
/// `None` means the operator is editing a fresh line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    position: Option<usize>,
}

impl HistoryCursor {
    /// Step toward older entries; stays on the oldest one
    pub fn up<'a>(&mut self, history: &'a HistoryLog) -> Option<&'a str> {
        let next = match self.position {
            None => 0,
            Some(i) if i + 1 < history.size() => i + 1,
            Some(i) => i,
        };
        let entry = history.get(next)?;
        self.position = Some(next);
        Some(entry)
    }

    /// Step toward newer entries; past the newest returns an empty line
    pub fn down<'a>(&mut self, history: &'a HistoryLog) -> &'a str {
        match self.position {
            Some(i) if i > 0 => {
                self.position = Some(i - 1);
                history.get(i - 1).unwrap_or("")
            }
            _ => {
                self.position = None;
                ""
            }
        }
    }

    pub fn reset(&mut self) {
        self.position = None;
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }
}

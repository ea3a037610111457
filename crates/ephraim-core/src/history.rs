//! Command history persisted at `~/.ephraim/history`.
//!
//! One entry per line; consecutive duplicates are dropped.

use std::fs;
use std::path::PathBuf;

const DEFAULT_MAX_ENTRIES: usize = 1000;

pub struct CommandHistory {
    path: PathBuf,
    entries: Vec<String>,
    max_entries: usize,
}

impl CommandHistory {
    /// Open (and load) the history file at the default location.
    pub fn open_default() -> Self {
        Self::open(crate::paths::history_file())
    }

    pub fn open(path: PathBuf) -> Self {
        let mut history = Self {
            path,
            entries: Vec::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
        };
        history.load();
        history
    }

    fn load(&mut self) {
        if let Ok(content) = fs::read_to_string(&self.path) {
            self.entries = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
        }
    }

    fn save(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        // History persistence is best-effort; a read-only home directory
        // must not break the session.
        if let Err(e) = fs::write(&self.path, self.entries.join("\n") + "\n") {
            tracing::debug!(error = %e, "could not write history file");
        }
    }

    /// Append an entry, skipping empty input and consecutive duplicates.
    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) == Some(entry) {
            return;
        }
        self.entries.push(entry.to_string());
        self.save();
    }

    pub fn recent(&self, count: usize) -> &[String] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }

    pub fn search(&self, query: &str) -> Vec<&String> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.to_lowercase().contains(&query))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_in_tempdir() -> (tempfile::TempDir, CommandHistory) {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = CommandHistory::open(dir.path().join("history"));
        (dir, history)
    }

    #[test]
    fn add_persists_across_reopen() {
        let (dir, mut history) = history_in_tempdir();
        history.add("first task");
        history.add("second task");

        let reopened = CommandHistory::open(dir.path().join("history"));
        assert_eq!(reopened.recent(10), &["first task", "second task"]);
    }

    #[test]
    fn consecutive_duplicates_are_dropped() {
        let (_dir, mut history) = history_in_tempdir();
        history.add("same");
        history.add("same");
        history.add("other");
        history.add("same");

        assert_eq!(history.len(), 3);
        assert_eq!(history.recent(10), &["same", "other", "same"]);
    }

    #[test]
    fn empty_entries_are_ignored() {
        let (_dir, mut history) = history_in_tempdir();
        history.add("   ");
        assert!(history.is_empty());
    }

    #[test]
    fn search_is_case_insensitive() {
        let (_dir, mut history) = history_in_tempdir();
        history.add("Fix the Parser");
        history.add("add tests");

        let hits = history.search("parser");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], "Fix the Parser");
    }

    #[test]
    fn trims_to_max_entries_on_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut history = CommandHistory::open(dir.path().join("history"));
        history.max_entries = 3;
        for i in 0..6 {
            history.add(&format!("entry {i}"));
        }
        assert_eq!(history.recent(10), &["entry 3", "entry 4", "entry 5"]);
    }
}

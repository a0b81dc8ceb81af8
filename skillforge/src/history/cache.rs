//! Bounded, durable history of completed sessions.
//!
//! The whole history is one JSON array on disk, newest first, rewritten in
//! full after every mutation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::entry::{EntryDraft, HistoryEntry};

/// File name of the history store inside the data directory.
pub const HISTORY_FILE: &str = "skillforge_history.json";

/// Newest-first history capped at [`HistoryCache::MAX_ENTRIES`].
#[derive(Debug)]
pub struct HistoryCache {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl HistoryCache {
    pub const MAX_ENTRIES: usize = 20;

    /// Load the history at `path`.
    ///
    /// A missing file, invalid JSON or a non-array payload all yield an empty
    /// history. Array items that are not valid entries are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_entries(&path);
        debug!(path = %path.display(), count = entries.len(), "loaded history");
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by full id or by a prefix matching exactly one entry.
    pub fn find(&self, id: &str) -> Option<&HistoryEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Some(entry);
        }
        if id.is_empty() {
            return None;
        }
        let mut matches = self.entries.iter().filter(|e| e.id.starts_with(id));
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }

    /// Stamp and prepend a new entry, evict past capacity, then persist.
    ///
    /// The in-memory history only changes once the write has succeeded.
    pub fn add(&mut self, draft: EntryDraft) -> Result<&HistoryEntry> {
        let entry = draft.into_entry();
        info!(id = %entry.id, skill = %entry.skill_name, "adding history entry");

        let mut entries = Vec::with_capacity(Self::MAX_ENTRIES);
        entries.push(entry);
        entries.extend(self.entries.iter().take(Self::MAX_ENTRIES - 1).cloned());
        let evicted = self.entries.len() + 1 - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted oldest history entries");
        }

        self.replace(entries)?;
        Ok(&self.entries[0])
    }

    /// Remove the entry with `id`, then persist. Returns whether anything
    /// was removed.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let entries: Vec<HistoryEntry> =
            self.entries.iter().filter(|e| e.id != id).cloned().collect();
        let removed = entries.len() != self.entries.len();
        self.replace(entries)?;
        Ok(removed)
    }

    /// Remove every entry, then persist.
    pub fn clear(&mut self) -> Result<()> {
        self.replace(Vec::new())
    }

    fn replace(&mut self, entries: Vec<HistoryEntry>) -> Result<()> {
        self.persist(&entries)?;
        self.entries = entries;
        Ok(())
    }

    fn persist(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create history directory {}", parent.display())
                })?;
            }
        }

        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize history")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write history to {}", self.path.display()))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Vec<HistoryEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read history, starting empty");
            return Vec::new();
        }
    };

    let items = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!(path = %path.display(), "history is not a JSON array, starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "history is not valid JSON, starting empty");
            return Vec::new();
        }
    };

    let mut entries: Vec<HistoryEntry> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable history entry");
                None
            }
        })
        .collect();
    entries.truncate(HistoryCache::MAX_ENTRIES);
    entries
}

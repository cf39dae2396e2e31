//! Recently-played preset history with back/forward navigation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Ring capacity: 64 navigable entries plus two fence slots.
pub const HISTORY_CAPACITY: usize = 64 + 2;

/// Circular buffer of preset paths. The cursor marks the entry currently
/// playing; entries past the cursor are forward (redo) history. New entries
/// are only written at the forward fence, so loading a fresh preset after
/// stepping back discards the forward tail.
#[derive(Debug, Default)]
pub struct PresetHistory {
    entries: VecDeque<PathBuf>,
    cursor: usize,
}

impl PresetHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a freshly loaded preset, truncating any forward history and
    /// dropping the oldest entry once the ring is full.
    pub fn push(&mut self, path: &Path) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(path.to_path_buf());
        if self.entries.len() > HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Steps back to the previous entry, if one exists. The returned path is
    /// replayed without being re-recorded.
    pub fn back(&mut self) -> Option<PathBuf> {
        if self.cursor == 0 || self.entries.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    /// Steps forward after one or more `back` calls.
    pub fn forward(&mut self) -> Option<PathBuf> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).cloned()
    }

    pub fn current(&self) -> Option<&Path> {
        self.entries.get(self.cursor).map(PathBuf::as_path)
    }

    /// True if `path` is anywhere in the ring. Used for duplicate
    /// suppression during random selection.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|p| p == path)
    }
}

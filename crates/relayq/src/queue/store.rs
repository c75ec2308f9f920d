//! In-process FIFO with per-key uniqueness.

use relayq_common::{Item, QueueError, QueueSnapshot};
use std::collections::{HashSet, VecDeque};

/// The authoritative local queue.
///
/// Invariant: `keys` holds exactly the keys present in `items`, and no key
/// appears twice. Synchronization is the owner's job.
#[derive(Debug, Default)]
pub struct QueueStore {
    items: VecDeque<Item>,
    keys: HashSet<String>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail; rejects a key already present
    pub fn push(&mut self, item: Item) -> Result<(), QueueError> {
        if self.keys.contains(&item.key) {
            return Err(QueueError::KeyExists(item.key));
        }
        self.keys.insert(item.key.clone());
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return the head
    pub fn pull(&mut self) -> Result<Item, QueueError> {
        let item = self.items.pop_front().ok_or(QueueError::EmptyQueue)?;
        self.keys.remove(&item.key);
        Ok(item)
    }

    /// Remove the item with `key` wherever it sits
    pub fn delete(&mut self, key: &str) -> Result<(), QueueError> {
        if !self.keys.remove(key) {
            return Err(QueueError::KeyNotFound(key.to_string()));
        }
        if let Some(pos) = self.items.iter().position(|i| i.key == key) {
            self.items.remove(pos);
        }
        Ok(())
    }

    /// Push `items` in order, stopping at the first duplicate key.
    ///
    /// Items merged before the conflict are kept. Returns how many merged.
    pub fn bulk_merge(&mut self, items: impl IntoIterator<Item = Item>) -> Result<usize, QueueError> {
        let mut merged = 0;
        for item in items {
            self.push(item)?;
            merged += 1;
        }
        Ok(merged)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            key_set: self.keys.iter().cloned().collect(),
            list: self.items.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

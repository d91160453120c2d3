//! Per-ordering-key serialization.
//!
//! A key is "active" while a task is processing one of its messages. New
//! messages for an active key wait in that key's FIFO and are handed to the
//! same task in arrival order; messages for other keys run concurrently.

use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub struct OrderingQueues<T> {
    active: HashMap<String, VecDeque<T>>,
}

impl<T> Default for OrderingQueues<T> {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
        }
    }
}

impl<T> OrderingQueues<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `item` for `key`.
    ///
    /// Returns the item back when the caller should start processing it now
    /// (empty key, or the key was idle and is now marked active). Returns
    /// `None` when it was queued behind an active key.
    pub fn admit(&mut self, key: &str, item: T) -> Option<T> {
        if key.is_empty() {
            return Some(item);
        }
        match self.active.get_mut(key) {
            Some(queue) => {
                queue.push_back(item);
                None
            }
            None => {
                self.active.insert(key.to_string(), VecDeque::new());
                Some(item)
            }
        }
    }

    /// Next queued item for `key`. When the queue is empty the key is released.
    pub fn next(&mut self, key: &str) -> Option<T> {
        let queue = self.active.get_mut(key)?;
        match queue.pop_front() {
            Some(item) => Some(item),
            None => {
                self.active.remove(key);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn active_keys(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.active.values().map(VecDeque::len).sum()
    }
}

//! BoundedLog - Fixed-Capacity Event Logs
//!
//! ## Responsibilities
//!
//! - Newest-first, capacity-bounded storage for access records and
//!   dashboard notifications (independently locked instances)
//! - Consistent snapshots for readers
//! - Single-entry in-place mutation for the manual-grant override
//!
//! Writers never block on readers for long: critical sections are
//! O(capacity) and perform no I/O.

use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Capacity of the access-attempt log
pub const ACCESS_LOG_CAPACITY: usize = 50;
/// Capacity of the dashboard notification log
pub const NOTIFICATION_LOG_CAPACITY: usize = 20;

/// Insertion-ordered bounded log; newest entry at the front, the oldest
/// entry beyond capacity is evicted from the tail.
pub struct BoundedLog<T> {
    entries: RwLock<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Prepend an entry, evicting the oldest one beyond capacity
    pub async fn insert_front(&self, entry: T) {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        if entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// Copy of the current contents, newest first
    pub async fn snapshot(&self) -> Vec<T> {
        let entries = self.entries.read().await;
        entries.iter().cloned().collect()
    }

    /// Reset to empty
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Apply `mutate` to the first entry (front-to-back) matching `pred`.
    /// Returns a clone of the mutated entry, or `None` without touching
    /// anything when no entry matches. This is the only supported in-place
    /// mutation.
    pub async fn update_first<P, M>(&self, pred: P, mutate: M) -> Option<T>
    where
        P: Fn(&T) -> bool,
        M: FnOnce(&mut T),
    {
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            if pred(entry) {
                mutate(entry);
                return Some(entry.clone());
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_front_keeps_newest_first() {
        let log = BoundedLog::new(5);
        for i in 0..3 {
            log.insert_front(i).await;
        }
        assert_eq!(log.snapshot().await, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = BoundedLog::new(3);
        for i in 0..10 {
            log.insert_front(i).await;
            assert!(log.len().await <= 3);
        }
        // Only the three newest survive, still in insertion order
        assert_eq!(log.snapshot().await, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let log = BoundedLog::new(3);
        log.insert_front(1).await;
        let before = log.snapshot().await;
        log.insert_front(2).await;
        assert_eq!(before, vec![1]);
    }

    #[tokio::test]
    async fn test_update_first_mutates_only_first_match() {
        let log = BoundedLog::new(5);
        log.insert_front((1, "a")).await;
        log.insert_front((2, "b")).await;
        log.insert_front((3, "b")).await;

        let updated = log
            .update_first(|(_, tag)| *tag == "b", |entry| entry.0 = 99)
            .await;
        assert_eq!(updated, Some((99, "b")));
        // The later "b" (front-most) was mutated; the older one untouched
        assert_eq!(log.snapshot().await, vec![(99, "b"), (2, "b"), (1, "a")]);
    }

    #[tokio::test]
    async fn test_update_first_no_match_is_noop() {
        let log = BoundedLog::new(5);
        log.insert_front(1).await;
        let updated = log.update_first(|v| *v == 42, |v| *v = 0).await;
        assert_eq!(updated, None);
        assert_eq!(log.snapshot().await, vec![1]);
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let log = BoundedLog::new(5);
        log.insert_front(1).await;
        log.clear().await;
        assert!(log.is_empty().await);
    }
}

//! Completion accounting for one pass
//!
//! Each file carries a remainder: its fragment count, registered once before
//! any fragment is queued. A remainder only ever goes down, one credit per
//! resolved fragment. The global count is the sum of the remainders and is
//! published on a watch channel so the pass barrier can wait for zero.

use crate::types::FileId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Outstanding-fragment counter for one pass
#[derive(Debug)]
pub struct Completion {
    remaining: Mutex<HashMap<FileId, usize>>,
    total: watch::Sender<usize>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    /// An empty counter, already at zero
    pub fn new() -> Self {
        let (total, _) = watch::channel(0);
        Self {
            remaining: Mutex::new(HashMap::new()),
            total,
        }
    }

    /// Add `fragments` outstanding fragments for `file`
    pub fn register(&self, file: FileId, fragments: usize) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        *remaining.entry(file).or_default() += fragments;
        self.total.send_modify(|total| *total += fragments);
    }

    /// Resolve up to `count` fragments of `file`; returns how many were credited
    ///
    /// Credits beyond the file's remainder are dropped, so the count can
    /// never go below zero.
    pub fn credit(&self, file: FileId, count: usize) -> usize {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(left) = remaining.get_mut(&file) else {
            tracing::debug!(file = %file, count, "Credit for unregistered file ignored");
            return 0;
        };
        let credited = count.min(*left);
        if credited < count {
            tracing::debug!(file = %file, count, credited, "Credit exceeds remainder");
        }
        *left -= credited;
        if credited > 0 {
            self.total.send_modify(|total| *total -= credited);
        }
        credited
    }

    /// Resolve whatever is left of `file`; returns how many were credited
    pub fn settle(&self, file: FileId) -> usize {
        let left = self.remaining_for(file);
        self.credit(file, left)
    }

    /// Outstanding fragments across all files
    pub fn remaining(&self) -> usize {
        *self.total.borrow()
    }

    /// Outstanding fragments of one file
    pub fn remaining_for(&self, file: FileId) -> usize {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file)
            .copied()
            .unwrap_or(0)
    }

    /// Observe the global count
    pub fn watch(&self) -> watch::Receiver<usize> {
        self.total.subscribe()
    }

    /// Wait until every registered fragment has been resolved
    pub async fn wait_for_zero(&self) {
        let mut rx = self.total.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|total| *total == 0).await;
    }
}

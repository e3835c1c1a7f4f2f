//! Bounded LIFO history of committed transactions.

use crate::transaction::Transaction;
use std::collections::VecDeque;

/// Committed transactions, most recent last.
///
/// Only the top entry can be reverted. Pushing past `max_depth` evicts the
/// oldest entries, which the caller must prune.
#[derive(Debug)]
pub struct UndoStack {
    entries: VecDeque<Transaction>,
    max_depth: usize,
}

impl UndoStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Push a committed transaction, returning whatever fell off the bottom.
    #[must_use = "evicted transactions still hold snapshot references"]
    pub fn push(&mut self, transaction: Transaction) -> Vec<Transaction> {
        self.entries.push_back(transaction);
        let excess = self.entries.len().saturating_sub(self.max_depth);
        self.entries.drain(..excess).collect()
    }

    pub fn pop(&mut self) -> Option<Transaction> {
        self.entries.pop_back()
    }

    pub fn peek(&self) -> Option<&Transaction> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter()
    }
}

//! The single transaction slot.
//!
//! At most one transaction is in flight per engine. Acquiring the slot
//! yields a [`SlotGuard`]; dropping the guard releases it, on every exit
//! path including unwinding.

use crate::error::{EngineError, Result};
use crate::transaction::TransactionId;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub(crate) struct TransactionSlot {
    holder: Mutex<Option<Holder>>,
}

/// Who holds the slot. A revert or log compaction holds it without a new
/// transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Transaction(TransactionId),
    Maintenance,
}

impl TransactionSlot {
    /// Take the slot, failing instead of waiting if it is held.
    pub fn try_acquire(&self) -> Result<SlotGuard<'_>> {
        let mut holder = self.holder.lock();
        if let Some(current) = *holder {
            let id = match current {
                Holder::Transaction(id) => Some(id),
                Holder::Maintenance => None,
            };
            return Err(EngineError::TransactionInProgress { id });
        }
        *holder = Some(Holder::Maintenance);
        Ok(SlotGuard { slot: self })
    }

    #[cfg(test)]
    fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

/// Proof of holding the slot.
#[derive(Debug)]
pub(crate) struct SlotGuard<'a> {
    slot: &'a TransactionSlot,
}

impl SlotGuard<'_> {
    /// Record the transaction now running under this guard.
    pub fn bind(&self, id: TransactionId) {
        *self.slot.holder.lock() = Some(Holder::Transaction(id));
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.slot.holder.lock() = None;
    }
}

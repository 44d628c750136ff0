//! Row-level exclusive locks on wallet records
//!
//! A wallet's balance may only be read-for-update or written while its
//! [`RowGuard`] is alive. Multi-row acquisition always proceeds in
//! ascending [`WalletId`] order, which gives every set of racing units a
//! common total order and rules out circular waits.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    error::{Error, Result},
    types::WalletId,
};

#[derive(Debug, Default)]
struct RowSlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Lock table keyed by wallet
#[derive(Debug, Default)]
pub struct RowLocks {
    slots: DashMap<WalletId, Arc<RowSlot>>,
}

impl RowLocks {
    /// Create empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the row is free or `timeout` elapses
    pub fn acquire(&self, id: WalletId, timeout: Duration) -> Result<RowGuard<'_>> {
        // Clone the slot out so the map shard is not held while waiting.
        let slot = self.slots.entry(id).or_default().value().clone();
        let deadline = Instant::now() + timeout;

        let mut held = slot.held.lock();
        while *held {
            if slot.released.wait_until(&mut held, deadline).timed_out() && *held {
                drop(held);
                self.evict(id);
                tracing::warn!(wallet_id = %id, ?timeout, "Row lock wait timed out");
                return Err(Error::lock_timeout(id));
            }
        }
        *held = true;
        drop(held);

        Ok(RowGuard { id, slot, locks: self })
    }

    /// Drop the slot for `id` once it is free and only the map and the
    /// caller still reference it. The shard lock is held across the check,
    /// so no new waiter can clone the slot in between.
    fn evict(&self, id: WalletId) {
        self.slots
            .remove_if(&id, |_, slot| Arc::strong_count(slot) == 2 && !*slot.held.lock());
    }

    /// Lock every row in `ids` in ascending order, skipping duplicates.
    ///
    /// On failure the rows already taken are released before returning.
    pub fn acquire_all(&self, ids: &[WalletId], timeout: Duration) -> Result<Vec<RowGuard<'_>>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.acquire(id, timeout)?);
        }
        Ok(guards)
    }

    /// Whether some unit currently holds the row
    pub fn is_held(&self, id: WalletId) -> bool {
        self.slots
            .get(&id)
            .map(|slot| *slot.held.lock())
            .unwrap_or(false)
    }

    /// Number of rows with a live slot in the table
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }
}

/// Held row lock, released on drop
#[derive(Debug)]
pub struct RowGuard<'a> {
    id: WalletId,
    slot: Arc<RowSlot>,
    locks: &'a RowLocks,
}

impl RowGuard<'_> {
    /// Locked wallet
    pub fn wallet_id(&self) -> WalletId {
        self.id
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        *self.slot.held.lock() = false;
        self.slot.released.notify_one();
        self.locks.evict(self.id);
    }
}

//! Atomic unit of work
//!
//! An [`AtomicUnit`] holds the row locks of every wallet it touches,
//! reads those wallets under lock, stages entries and balance changes
//! against the locked snapshots, and publishes everything through one
//! [`LedgerStore::commit`].
//!
//! Every exit path releases the locks. Dropping a unit without calling
//! [`AtomicUnit::commit`] discards all staged work: nothing reaches the
//! store, so there is nothing to undo.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::{
    error::{Error, Result},
    storage::{Changeset, LedgerStore, RowGuard},
    types::{EntryPair, Movement, NewEntry, Wallet, WalletId, WalletStatus},
};

/// Scoped commit-or-abort unit over a set of locked wallets
pub struct AtomicUnit<'s, S: LedgerStore + ?Sized> {
    store: &'s S,
    /// Snapshots read under lock, updated as work is staged
    wallets: BTreeMap<WalletId, Wallet>,
    /// Rows with staged changes
    dirty: BTreeSet<WalletId>,
    entries: Vec<NewEntry>,
    lock_wait: Duration,
    committed: bool,
    _guards: Vec<RowGuard<'s>>,
}

impl<S: LedgerStore + ?Sized> std::fmt::Debug for AtomicUnit<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicUnit")
            .field("wallets", &self.wallets.keys().collect::<Vec<_>>())
            .field("dirty", &self.dirty)
            .field("staged_entries", &self.entries.len())
            .field("committed", &self.committed)
            .finish()
    }
}

impl<'s, S: LedgerStore + ?Sized> AtomicUnit<'s, S> {
    /// Lock `ids` (ascending, deduplicated) and read each wallet.
    ///
    /// Fails `NotFound` if any wallet is missing, or `Persistence` if a
    /// lock is not granted within `lock_timeout`. Locks taken so far are
    /// released on failure.
    pub fn begin(store: &'s S, ids: &[WalletId], lock_timeout: Duration) -> Result<Self> {
        let started = Instant::now();
        let guards = store.row_locks().acquire_all(ids, lock_timeout)?;
        let lock_wait = started.elapsed();

        let mut wallets = BTreeMap::new();
        for guard in &guards {
            let id = guard.wallet_id();
            let wallet = store
                .get_wallet(id)?
                .ok_or_else(|| Error::wallet_not_found(id))?;
            wallets.insert(id, wallet);
        }

        Ok(Self {
            store,
            wallets,
            dirty: BTreeSet::new(),
            entries: Vec::new(),
            lock_wait,
            committed: false,
            _guards: guards,
        })
    }

    /// Locked snapshot of a wallet, including staged changes
    pub fn wallet(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets.get(&id)
    }

    /// Time spent waiting for row locks in `begin`
    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    /// Stage a debit/credit pair and apply both balance deltas.
    ///
    /// Nothing is staged unless every check passes.
    pub fn post(&mut self, movement: Movement, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }

        let (debited, credited) = (movement.debited(), movement.credited());
        if debited == credited {
            return Err(Error::SelfTransfer(debited));
        }

        let debit_balance = self.locked(debited)?.balance;
        let credit_balance = self.locked(credited)?.balance;

        if debit_balance < amount {
            return Err(Error::InsufficientFunds {
                wallet_id: debited,
                balance: debit_balance,
                requested: amount,
            });
        }
        let credit_balance = credit_balance.checked_add(amount).ok_or_else(|| {
            Error::Persistence(format!("balance overflow on wallet {}", credited))
        })?;

        self.stage_balance(debited, debit_balance - amount);
        self.stage_balance(credited, credit_balance);
        self.entries.extend(movement.legs(amount));

        Ok(())
    }

    /// Stage a status change
    pub fn set_status(&mut self, id: WalletId, status: WalletStatus) -> Result<()> {
        self.locked(id)?;
        if let Some(wallet) = self.wallets.get_mut(&id) {
            wallet.status = status;
            self.dirty.insert(id);
        }
        Ok(())
    }

    /// Publish all staged work atomically, then release the locks.
    pub fn commit(mut self) -> Result<Committed> {
        let changes = Changeset {
            wallets: self
                .dirty
                .iter()
                .filter_map(|id| self.wallets.get(id).cloned())
                .collect(),
            entries: std::mem::take(&mut self.entries),
        };

        if changes.is_empty() {
            self.committed = true;
            return Ok(Committed::default());
        }

        let inserted = self.store.commit(changes)?;
        self.committed = true;

        // Re-read while still holding the locks to pick up store timestamps.
        let mut wallets = Vec::with_capacity(self.dirty.len());
        for &id in &self.dirty {
            let wallet = self
                .store
                .get_wallet(id)?
                .ok_or_else(|| Error::wallet_not_found(id))?;
            wallets.push(wallet);
        }

        let mut pairs = Vec::with_capacity(inserted.len() / 2);
        let mut lines = inserted.into_iter();
        while let (Some(debit), Some(credit)) = (lines.next(), lines.next()) {
            pairs.push(EntryPair { debit, credit });
        }

        tracing::debug!(
            wallets = ?self.dirty,
            pairs = pairs.len(),
            "Atomic unit committed"
        );

        Ok(Committed { wallets, pairs })
    }

    fn locked(&self, id: WalletId) -> Result<&Wallet> {
        self.wallets.get(&id).ok_or_else(|| {
            Error::Persistence(format!("wallet {} is not locked by this unit", id))
        })
    }

    fn stage_balance(&mut self, id: WalletId, balance: i64) {
        if let Some(wallet) = self.wallets.get_mut(&id) {
            wallet.balance = balance;
            self.dirty.insert(id);
        }
    }
}

impl<S: LedgerStore + ?Sized> Drop for AtomicUnit<'_, S> {
    fn drop(&mut self) {
        if !self.committed && !self.dirty.is_empty() {
            tracing::debug!(
                wallets = ?self.dirty,
                staged_entries = self.entries.len(),
                "Atomic unit rolled back"
            );
        }
    }
}

/// Result of a committed unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Committed {
    /// Rewritten wallet rows, ascending by ID
    pub wallets: Vec<Wallet>,

    /// Posted pairs, in staging order
    pub pairs: Vec<EntryPair>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EntryFilter, MemoryStore, TransactionLog, WalletStore};
    use crate::types::{NewWallet, OperationType};

    const WAIT: Duration = Duration::from_secs(1);

    fn store_with(balances: &[i64]) -> (MemoryStore, Vec<WalletId>) {
        let store = MemoryStore::new();
        let ids = balances
            .iter()
            .enumerate()
            .map(|(i, &balance)| {
                store
                    .insert_wallet(NewWallet::user(format!("user-{}", i)).with_balance(balance))
                    .unwrap()
                    .id
            })
            .collect();
        (store, ids)
    }

    #[test]
    fn test_post_and_commit() {
        let (store, ids) = store_with(&[1000, 0]);
        let movement = Movement::Transfer {
            from: ids[0],
            to: ids[1],
        };

        let mut unit = AtomicUnit::begin(&store, &[ids[1], ids[0]], WAIT).unwrap();
        assert!(store.row_locks().is_held(ids[0]));
        unit.post(movement, 300).unwrap();
        assert_eq!(unit.wallet(ids[0]).unwrap().balance, 700);

        let committed = unit.commit().unwrap();
        assert!(!store.row_locks().is_held(ids[0]));
        assert!(!store.row_locks().is_held(ids[1]));

        assert_eq!(committed.pairs.len(), 1);
        let pair = &committed.pairs[0];
        assert_eq!(pair.debit.operation_type, OperationType::Debit);
        assert_eq!(pair.debit.subject_wallet_id, ids[0]);
        assert!(pair.debit.mirrors(&pair.credit));
        assert_eq!(committed.wallets[0].balance, 700);
        assert_eq!(committed.wallets[1].balance, 300);

        assert_eq!(store.get_wallet(ids[1]).unwrap().unwrap().balance, 300);
    }

    #[test]
    fn test_insufficient_funds_stages_nothing() {
        let (store, ids) = store_with(&[5000, 0]);
        let movement = Movement::Transfer {
            from: ids[0],
            to: ids[1],
        };

        let mut unit = AtomicUnit::begin(&store, &ids, WAIT).unwrap();
        let err = unit.post(movement, 6000).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds {
                balance: 5000,
                requested: 6000,
                ..
            }
        ));
        assert_eq!(unit.wallet(ids[0]).unwrap().balance, 5000);
        assert_eq!(unit.wallet(ids[1]).unwrap().balance, 0);

        let committed = unit.commit().unwrap();
        assert!(committed.pairs.is_empty());
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn test_drop_discards_staged_work() {
        let (store, ids) = store_with(&[1000, 0]);
        {
            let mut unit = AtomicUnit::begin(&store, &ids, WAIT).unwrap();
            unit.post(
                Movement::Transfer {
                    from: ids[0],
                    to: ids[1],
                },
                1000,
            )
            .unwrap();
        }

        assert_eq!(store.get_wallet(ids[0]).unwrap().unwrap().balance, 1000);
        assert!(store.find_entries(&EntryFilter::default()).unwrap().is_empty());
        assert!(!store.row_locks().is_held(ids[0]));
    }

    #[test]
    fn test_rejects_bad_input() {
        let (store, ids) = store_with(&[1000, 0, 0]);
        let mut unit = AtomicUnit::begin(&store, &ids[..2], WAIT).unwrap();

        assert!(matches!(
            unit.post(Movement::Transfer { from: ids[0], to: ids[1] }, 0),
            Err(Error::InvalidAmount(0))
        ));
        assert!(matches!(
            unit.post(Movement::Transfer { from: ids[0], to: ids[0] }, 10),
            Err(Error::SelfTransfer(_))
        ));
        // Third wallet was never locked
        assert!(matches!(
            unit.post(Movement::Transfer { from: ids[0], to: ids[2] }, 10),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_begin_missing_wallet_releases_locks() {
        let (store, ids) = store_with(&[10]);
        let missing = WalletId::new(99);

        let err = AtomicUnit::begin(&store, &[ids[0], missing], WAIT).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!store.row_locks().is_held(ids[0]));
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let (store, ids) = store_with(&[10, i64::MAX]);
        let mut unit = AtomicUnit::begin(&store, &ids, WAIT).unwrap();
        let err = unit
            .post(Movement::Transfer { from: ids[0], to: ids[1] }, 10)
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(unit.wallet(ids[0]).unwrap().balance, 10);
    }

    #[test]
    fn test_set_status() {
        let (store, ids) = store_with(&[10]);
        let mut unit = AtomicUnit::begin(&store, &ids, WAIT).unwrap();
        unit.set_status(ids[0], WalletStatus::Suspended).unwrap();
        let committed = unit.commit().unwrap();

        assert_eq!(committed.wallets[0].status, WalletStatus::Suspended);
        assert_eq!(committed.wallets[0].balance, 10);
        assert_eq!(store.entry_count(), 0);
    }
}

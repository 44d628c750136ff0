//! In-process store
//!
//! Holds everything behind one `RwLock`, so a commit is trivially atomic:
//! it validates the whole changeset first, then applies it under the
//! write guard.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{Changeset, EntryFilter, LedgerStore, RowLocks, TransactionLog, WalletStore};
use crate::{
    error::{Error, Result},
    types::{Entry, EntryId, NewWallet, Wallet, WalletId},
};

#[derive(Debug)]
struct State {
    wallets: BTreeMap<WalletId, Wallet>,
    by_user: HashMap<String, WalletId>,
    entries: Vec<Entry>,
    next_wallet_id: i64,
    next_entry_id: i64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            wallets: BTreeMap::new(),
            by_user: HashMap::new(),
            entries: Vec::new(),
            next_wallet_id: 1,
            next_entry_id: 1,
        }
    }
}

/// In-memory wallet store and transaction log
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    locks: RowLocks,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }
}

impl WalletStore for MemoryStore {
    fn insert_wallet(&self, wallet: NewWallet) -> Result<Wallet> {
        let mut state = self.state.write();
        if state.by_user.contains_key(&wallet.user_id) {
            return Err(Error::DuplicateWallet(wallet.user_id));
        }

        let now = Utc::now();
        let id = WalletId::new(state.next_wallet_id);
        state.next_wallet_id += 1;

        let stored = Wallet {
            id,
            user_id: wallet.user_id,
            acnt_type: wallet.acnt_type,
            balance: wallet.balance,
            status: wallet.status,
            created_at: now,
            updated_at: now,
        };
        state.by_user.insert(stored.user_id.clone(), id);
        state.wallets.insert(id, stored.clone());

        Ok(stored)
    }

    fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.state.read().wallets.get(&id).cloned())
    }

    fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>> {
        let state = self.state.read();
        Ok(state
            .by_user
            .get(user_id)
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    fn list_wallets(&self) -> Result<Vec<Wallet>> {
        Ok(self.state.read().wallets.values().cloned().collect())
    }
}

impl TransactionLog for MemoryStore {
    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let matching = self
            .state
            .read()
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        Ok(filter.finish(matching))
    }
}

impl LedgerStore for MemoryStore {
    fn row_locks(&self) -> &RowLocks {
        &self.locks
    }

    fn commit(&self, changes: Changeset) -> Result<Vec<Entry>> {
        let mut state = self.state.write();

        for wallet in &changes.wallets {
            if !state.wallets.contains_key(&wallet.id) {
                return Err(Error::wallet_not_found(wallet.id));
            }
        }
        for entry in &changes.entries {
            for id in [entry.subject_wallet_id, entry.object_wallet_id] {
                if !state.wallets.contains_key(&id) {
                    return Err(Error::wallet_not_found(id));
                }
            }
        }

        let now = Utc::now();
        for mut wallet in changes.wallets {
            wallet.updated_at = now;
            state.wallets.insert(wallet.id, wallet);
        }

        let mut inserted = Vec::with_capacity(changes.entries.len());
        for entry in changes.entries {
            let id = EntryId::new(state.next_entry_id);
            state.next_entry_id += 1;
            let entry = entry.into_entry(id, now);
            state.entries.push(entry.clone());
            inserted.push(entry);
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountType, Movement, OperationType, WalletStatus};

    #[test]
    fn test_insert_and_lookup() {
        let store = MemoryStore::new();
        let alice = store.insert_wallet(NewWallet::user("alice")).unwrap();
        let bob = store.insert_wallet(NewWallet::user("bob")).unwrap();

        assert_eq!(alice.id, WalletId::new(1));
        assert_eq!(bob.id, WalletId::new(2));
        assert_eq!(alice.balance, 0);
        assert_eq!(alice.status, WalletStatus::Active);
        assert_eq!(alice.acnt_type, AccountType::User);

        assert_eq!(store.get_wallet(bob.id).unwrap().unwrap().user_id, "bob");
        assert_eq!(store.get_wallet_by_user("alice").unwrap().unwrap().id, alice.id);
        assert!(store.get_wallet(WalletId::new(99)).unwrap().is_none());
        assert!(store.get_wallet_by_user("carol").unwrap().is_none());
        assert_eq!(store.list_wallets().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let store = MemoryStore::new();
        store.insert_wallet(NewWallet::user("alice")).unwrap();
        let err = store.insert_wallet(NewWallet::provider("alice")).unwrap_err();
        assert!(matches!(err, Error::DuplicateWallet(user) if user == "alice"));
    }

    #[test]
    fn test_commit_applies_everything() {
        let store = MemoryStore::new();
        let mut from = store
            .insert_wallet(NewWallet::user("alice").with_balance(500))
            .unwrap();
        let mut to = store.insert_wallet(NewWallet::user("bob")).unwrap();

        let movement = Movement::Transfer { from: from.id, to: to.id };
        from.balance -= 200;
        to.balance += 200;

        let inserted = store
            .commit(Changeset {
                wallets: vec![from.clone(), to.clone()],
                entries: movement.legs(200).to_vec(),
            })
            .unwrap();

        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0].id, EntryId::new(1));
        assert_eq!(inserted[0].operation_type, OperationType::Debit);
        assert_eq!(inserted[1].id, EntryId::new(2));
        assert_eq!(store.get_wallet(from.id).unwrap().unwrap().balance, 300);
        assert_eq!(store.get_wallet(to.id).unwrap().unwrap().balance, 200);
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn test_commit_rejects_unknown_wallet_without_side_effects() {
        let store = MemoryStore::new();
        let mut alice = store
            .insert_wallet(NewWallet::user("alice").with_balance(500))
            .unwrap();
        alice.balance = 0;

        let movement = Movement::Transfer {
            from: alice.id,
            to: WalletId::new(77),
        };
        let result = store.commit(Changeset {
            wallets: vec![alice.clone()],
            entries: movement.legs(500).to_vec(),
        });

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.get_wallet(alice.id).unwrap().unwrap().balance, 500);
        assert_eq!(store.entry_count(), 0);
    }
}

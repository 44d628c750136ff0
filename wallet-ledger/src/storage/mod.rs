//! Storage layer: Wallet Store and Transaction Log
//!
//! # Contract
//!
//! - Wallet rows are created with [`WalletStore::insert_wallet`] and
//!   rewritten only through [`LedgerStore::commit`], by a caller holding
//!   the rows' locks from [`LedgerStore::row_locks`].
//! - Entries are append-only: `commit` inserts, nothing updates or deletes.
//! - `commit` is all-or-nothing: every wallet row and every entry of a
//!   [`Changeset`] becomes visible together, or none does.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - in-process, for tests and embedding
//! - [`RocksStore`] - durable, RocksDB column families

pub mod locks;
pub mod memory;
pub mod rocks;

pub use locks::{RowGuard, RowLocks};
pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::{
    error::Result,
    types::{
        Entry, EntryStatus, NewEntry, NewWallet, OperationType, TransactionType, Wallet, WalletId,
    },
};

/// Durable keyed storage for wallet records
pub trait WalletStore: Send + Sync {
    /// Insert a new wallet, assigning its ID.
    ///
    /// Fails with `DuplicateWallet` if `user_id` already owns a wallet.
    fn insert_wallet(&self, wallet: NewWallet) -> Result<Wallet>;

    /// Point lookup by ID
    fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>>;

    /// Point lookup by owning principal
    fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>>;

    /// All wallets, ascending by ID
    fn list_wallets(&self) -> Result<Vec<Wallet>>;
}

/// Append-only storage of posted entries
pub trait TransactionLog: Send + Sync {
    /// Entries matching `filter`, newest first
    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>>;
}

/// A store the ledger engine can run atomic units against
pub trait LedgerStore: WalletStore + TransactionLog {
    /// Exclusive per-wallet row locks
    fn row_locks(&self) -> &RowLocks;

    /// Apply a changeset atomically and return the inserted entries, in
    /// changeset order, with their assigned IDs.
    fn commit(&self, changes: Changeset) -> Result<Vec<Entry>>;
}

/// Staged writes of one atomic unit
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Wallet rows to overwrite (must already exist)
    pub wallets: Vec<Wallet>,

    /// Entries to append
    pub entries: Vec<NewEntry>,
}

impl Changeset {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty() && self.entries.is_empty()
    }
}

/// Equality predicates over entries; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Wallet the entry is recorded against
    pub subject_wallet_id: Option<WalletId>,

    /// Counterparty wallet
    pub object_wallet_id: Option<WalletId>,

    /// Transaction type
    pub transaction_type: Option<TransactionType>,

    /// Debit or credit
    pub operation_type: Option<OperationType>,

    /// Entry status
    pub status: Option<EntryStatus>,

    /// Keep only the newest `limit` matches
    pub limit: Option<usize>,
}

impl EntryFilter {
    /// Entries recorded against `wallet_id`
    pub fn subject(wallet_id: WalletId) -> Self {
        Self {
            subject_wallet_id: Some(wallet_id),
            ..Self::default()
        }
    }

    /// Restrict to a counterparty
    pub fn object(mut self, wallet_id: WalletId) -> Self {
        self.object_wallet_id = Some(wallet_id);
        self
    }

    /// Restrict to a transaction type
    pub fn transaction_type(mut self, kind: TransactionType) -> Self {
        self.transaction_type = Some(kind);
        self
    }

    /// Restrict to one side
    pub fn operation_type(mut self, side: OperationType) -> Self {
        self.operation_type = Some(side);
        self
    }

    /// Restrict to a status
    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every set predicate (ignores `limit`)
    pub fn matches(&self, entry: &Entry) -> bool {
        self.subject_wallet_id.map_or(true, |id| entry.subject_wallet_id == id)
            && self.object_wallet_id.map_or(true, |id| entry.object_wallet_id == Some(id))
            && self.transaction_type.map_or(true, |t| entry.transaction_type == t)
            && self.operation_type.map_or(true, |o| entry.operation_type == o)
            && self.status.map_or(true, |s| entry.status == s)
    }

    /// Order newest first and apply `limit`
    pub(crate) fn finish(&self, mut entries: Vec<Entry>) -> Vec<Entry> {
        // Both lines of a pair share a timestamp; the ID breaks the tie.
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryId, Movement};
    use chrono::{Duration, Utc};

    fn entries() -> Vec<Entry> {
        let now = Utc::now();
        let deposit = Movement::Deposit {
            provider: WalletId::new(1),
            wallet: WalletId::new(3),
        };
        let transfer = Movement::Transfer {
            from: WalletId::new(3),
            to: WalletId::new(4),
        };
        let [d1, c1] = deposit.legs(100);
        let [d2, c2] = transfer.legs(40);
        vec![
            d1.into_entry(EntryId::new(1), now - Duration::seconds(5)),
            c1.into_entry(EntryId::new(2), now - Duration::seconds(5)),
            d2.into_entry(EntryId::new(3), now),
            c2.into_entry(EntryId::new(4), now),
        ]
    }

    #[test]
    fn test_filter_matches() {
        let all = entries();
        let wallet = WalletId::new(3);

        let mine: Vec<_> = all
            .iter()
            .filter(|e| EntryFilter::subject(wallet).matches(e))
            .collect();
        assert_eq!(mine.len(), 2);

        let debits = EntryFilter::subject(wallet).operation_type(OperationType::Debit);
        assert_eq!(all.iter().filter(|e| debits.matches(e)).count(), 1);

        let from_provider = EntryFilter::default()
            .object(WalletId::new(1))
            .transaction_type(TransactionType::Deposit);
        assert_eq!(all.iter().filter(|e| from_provider.matches(e)).count(), 1);

        let pending = EntryFilter::default().status(EntryStatus::Pending);
        assert!(!all.iter().any(|e| pending.matches(e)));
    }

    #[test]
    fn test_finish_orders_newest_first() {
        let ordered = EntryFilter::default().finish(entries());
        let ids: Vec<i64> = ordered.iter().map(|e| e.id.get()).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);

        let limited = EntryFilter::default().limit(3).finish(entries());
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].id, EntryId::new(4));
    }
}

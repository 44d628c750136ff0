//! Durable store using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet rows (key: wallet_id, big-endian)
//! - `transactions` - Append-only entry log (key: entry_id, big-endian)
//! - `indices` - Secondary indices for fast lookups
//!
//! # Index keys
//!
//! - `u|{user_id}` -> wallet_id
//! - `s|{subject_wallet_id}{entry_id}` -> empty

use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};

use super::{Changeset, EntryFilter, LedgerStore, RowLocks, TransactionLog, WalletStore};
use crate::{
    config::RocksDBConfig,
    error::{Error, Result},
    types::{Entry, EntryId, NewWallet, Wallet, WalletId},
    Config,
};

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

const IDX_USER: &[u8] = b"u|";
const IDX_SUBJECT: &[u8] = b"s|";

/// Storage wrapper for RocksDB
pub struct RocksStore {
    db: DB,
    sync_writes: bool,
    locks: RowLocks,
    // Next wallet ID; held across the insert so the user index stays unique.
    create_lock: Mutex<i64>,
    // Next entry ID; held across the batch write so IDs are gap-free and
    // monotonic in commit order.
    commit_lock: Mutex<i64>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let db_opts = Self::db_options(&config.rocksdb);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let mut store = Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
            locks: RowLocks::new(),
            create_lock: Mutex::new(1),
            commit_lock: Mutex::new(1),
        };

        let next_wallet_id = store.last_key(CF_WALLETS)?.map_or(1, |id| id + 1);
        let next_entry_id = store.last_key(CF_TRANSACTIONS)?.map_or(1, |id| id + 1);
        store.create_lock = Mutex::new(next_wallet_id);
        store.commit_lock = Mutex::new(next_entry_id);

        tracing::info!(
            path = %path.display(),
            next_wallet_id,
            next_entry_id,
            "Opened RocksDB wallet store"
        );

        Ok(store)
    }

    fn db_options(config: &RocksDBConfig) -> Options {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.max_background_jobs);

        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        db_opts
    }

    // Column family options

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallet rows are read on every operation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Persistence(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    /// Highest ID key stored in a column family
    fn last_key(&self, cf_name: &str) -> Result<Option<i64>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(Self::decode_id(&key)?))
            }
            None => Ok(None),
        }
    }

    // Key helpers

    fn decode_id(bytes: &[u8]) -> Result<i64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Persistence(format!("malformed id key of {} bytes", bytes.len())))?;
        Ok(i64::from_be_bytes(raw))
    }

    fn index_key_user(user_id: &str) -> Vec<u8> {
        let mut key = IDX_USER.to_vec();
        key.extend_from_slice(user_id.as_bytes());
        key
    }

    fn index_key_subject(wallet_id: WalletId, entry_id: Option<EntryId>) -> Vec<u8> {
        let mut key = IDX_SUBJECT.to_vec();
        key.extend_from_slice(&wallet_id.get().to_be_bytes());
        if let Some(entry_id) = entry_id {
            key.extend_from_slice(&entry_id.get().to_be_bytes());
        }
        key
    }

    // Entry reads

    fn get_entry(&self, entry_id: EntryId) -> Result<Entry> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, entry_id.get().to_be_bytes())?
            .ok_or_else(|| Error::Persistence(format!("indexed entry {} missing", entry_id)))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Entries of one subject wallet, via the subject index
    fn subject_entries(&self, wallet_id: WalletId) -> Result<Vec<Entry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_subject(wallet_id, None);

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry_id = Self::decode_id(&key[prefix.len()..])?;
            entries.push(self.get_entry(EntryId::new(entry_id))?);
        }

        Ok(entries)
    }

    fn all_entries(&self) -> Result<Vec<Entry>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_wallets: self.last_key(CF_WALLETS)?.unwrap_or(0) as u64,
            total_entries: self.last_key(CF_TRANSACTIONS)?.unwrap_or(0) as u64,
        })
    }

    /// Flush memtables and close (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl WalletStore for RocksStore {
    fn insert_wallet(&self, wallet: NewWallet) -> Result<Wallet> {
        let mut next_id = self.create_lock.lock();

        let cf_indices = self.cf_handle(CF_INDICES)?;
        let user_key = Self::index_key_user(&wallet.user_id);
        if self.db.get_cf(cf_indices, &user_key)?.is_some() {
            return Err(Error::DuplicateWallet(wallet.user_id));
        }

        let now = Utc::now();
        let stored = Wallet {
            id: WalletId::new(*next_id),
            user_id: wallet.user_id,
            acnt_type: wallet.acnt_type,
            balance: wallet.balance,
            status: wallet.status,
            created_at: now,
            updated_at: now,
        };
        let id_bytes = stored.id.get().to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_WALLETS)?, id_bytes, bincode::serialize(&stored)?);
        batch.put_cf(cf_indices, &user_key, id_bytes);
        self.db.write_opt(batch, &self.write_options())?;

        *next_id += 1;

        tracing::debug!(
            wallet_id = %stored.id,
            user_id = %stored.user_id,
            acnt_type = %stored.acnt_type,
            "Wallet created"
        );

        Ok(stored)
    }

    fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(cf, id.get().to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf_indices, Self::index_key_user(user_id))? {
            Some(id) => self.get_wallet(WalletId::new(Self::decode_id(&id)?)),
            None => Ok(None),
        }
    }

    fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            wallets.push(bincode::deserialize(&value)?);
        }
        Ok(wallets)
    }
}

impl TransactionLog for RocksStore {
    fn find_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let candidates = match filter.subject_wallet_id {
            Some(wallet_id) => self.subject_entries(wallet_id)?,
            None => self.all_entries()?,
        };
        let matching = candidates
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect();
        Ok(filter.finish(matching))
    }
}

impl LedgerStore for RocksStore {
    fn row_locks(&self) -> &RowLocks {
        &self.locks
    }

    fn commit(&self, changes: Changeset) -> Result<Vec<Entry>> {
        let mut next_id = self.commit_lock.lock();

        for wallet in &changes.wallets {
            if self.get_wallet(wallet.id)?.is_none() {
                return Err(Error::wallet_not_found(wallet.id));
            }
        }
        for entry in &changes.entries {
            for id in [entry.subject_wallet_id, entry.object_wallet_id] {
                if self.get_wallet(id)?.is_none() {
                    return Err(Error::wallet_not_found(id));
                }
            }
        }

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let now = Utc::now();
        let mut batch = WriteBatch::default();

        // 1. Wallet rows
        for mut wallet in changes.wallets {
            wallet.updated_at = now;
            batch.put_cf(
                cf_wallets,
                wallet.id.get().to_be_bytes(),
                bincode::serialize(&wallet)?,
            );
        }

        // 2. Entries + subject index
        let mut inserted = Vec::with_capacity(changes.entries.len());
        for (offset, entry) in changes.entries.into_iter().enumerate() {
            let entry = entry.into_entry(EntryId::new(*next_id + offset as i64), now);
            batch.put_cf(
                cf_transactions,
                entry.id.get().to_be_bytes(),
                bincode::serialize(&entry)?,
            );
            batch.put_cf(
                cf_indices,
                Self::index_key_subject(entry.subject_wallet_id, Some(entry.id)),
                b"",
            );
            inserted.push(entry);
        }

        // Atomic commit
        self.db.write_opt(batch, &self.write_options())?;
        *next_id += inserted.len() as i64;

        Ok(inserted)
    }
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Highest wallet ID assigned
    pub total_wallets: u64,
    /// Highest entry ID assigned
    pub total_entries: u64,
}

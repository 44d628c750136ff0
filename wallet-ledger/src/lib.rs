//! Wallet Ledger
//!
//! Double-entry wallet ledger with row-level locking.
//!
//! # Architecture
//!
//! - **Wallet Store**: keyed wallet rows with per-row exclusive locks
//! - **Transaction Log**: append-only debit/credit entries
//! - **Atomic Units**: lock ascending, stage, commit all-or-nothing
//! - **Provider Registry**: two reserved counterparty wallets for money
//!   entering and leaving the ledger
//!
//! # Invariants
//!
//! - Non-negativity: every balance is `>= 0` after every commit
//! - Double entry: each operation posts one debit and one mirrored credit
//! - Agreement: a wallet's balance equals its opening balance plus the
//!   signed net of its entries
//! - Append-only: entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod metrics;
pub mod seed;
pub mod storage;
pub mod types;
pub mod unit;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{AuditReport, Ledger, LedgerOptions, Reconciliation};
pub use metrics::Metrics;
pub use storage::{
    EntryFilter, LedgerStore, MemoryStore, RocksStore, TransactionLog, WalletStore,
};
pub use types::{
    AccountType, Entry, EntryId, EntryStatus, Movement, NewWallet, OperationType,
    TransactionType, Wallet, WalletId, WalletStatus,
};
pub use unit::AtomicUnit;

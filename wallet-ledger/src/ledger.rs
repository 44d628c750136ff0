//! Main ledger orchestration layer
//!
//! This module ties together the wallet store, transaction log and
//! atomic units into the engine API: `create`, `deposit`, `withdraw`,
//! `transfer` and the read paths.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_ledger::{seed, Config, Ledger, LedgerOptions, NewWallet, RocksStore};
//!
//! fn main() -> wallet_ledger::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(RocksStore::open(&config)?);
//!     seed::ensure_providers(store.as_ref(), &config.providers)?;
//!
//!     let ledger = Ledger::new(store, LedgerOptions::from(&config));
//!     let alice = ledger.create(NewWallet::user("alice"))?;
//!     let receipt = ledger.deposit(alice.id, 5_000, None)?;
//!     assert_eq!(receipt.amount, 5_000);
//!
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    config::ProviderConfig,
    metrics::Metrics,
    storage::{EntryFilter, LedgerStore},
    types::{Entry, EntryId, Movement, NewWallet, OperationType, Wallet, WalletId, WalletStatus},
    unit::AtomicUnit,
    Config, Error, Result,
};

/// Engine settings
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Provider registry
    pub providers: ProviderConfig,

    /// Maximum wait for a wallet row lock
    pub lock_timeout: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for LedgerOptions {
    fn from(config: &Config) -> Self {
        Self {
            providers: config.providers.clone(),
            lock_timeout: config.locking.lock_timeout(),
        }
    }
}

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger<S: LedgerStore + ?Sized> {
    /// Wallet store and transaction log
    store: Arc<S>,

    /// Engine settings
    options: LedgerOptions,

    /// Optional Prometheus collectors
    metrics: Option<Metrics>,
}

impl<S: LedgerStore + ?Sized> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: LedgerStore + ?Sized> Ledger<S> {
    /// Create a ledger over `store`
    pub fn new(store: Arc<S>, options: LedgerOptions) -> Self {
        Self {
            store,
            options,
            metrics: None,
        }
    }

    /// Attach metrics collectors
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Engine settings
    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Create a wallet. The balance always starts at zero.
    pub fn create(&self, wallet: NewWallet) -> Result<Wallet> {
        self.observe("create", || {
            let wallet = self.store.insert_wallet(wallet.with_balance(0))?;
            tracing::debug!(
                wallet_id = %wallet.id,
                user_id = %wallet.user_id,
                acnt_type = %wallet.acnt_type,
                "Wallet created"
            );
            Ok(wallet)
        })
    }

    /// Move `amount` from a provider into `wallet_id`.
    ///
    /// `provider` defaults to the configured deposit provider. Returns the
    /// credit entry recorded against the wallet.
    pub fn deposit(
        &self,
        wallet_id: WalletId,
        amount: i64,
        provider: Option<&str>,
    ) -> Result<Entry> {
        self.observe("deposit", || {
            check_amount(amount)?;
            self.require_wallet(wallet_id)?;
            let provider_id = provider.unwrap_or(&self.options.providers.deposit_provider);
            let provider = self.provider_wallet(provider_id)?;

            self.post(
                Movement::Deposit {
                    provider: provider.id,
                    wallet: wallet_id,
                },
                amount,
            )
        })
    }

    /// Move `amount` out of `wallet_id` into a provider.
    ///
    /// `provider` defaults to the configured withdraw provider. Returns the
    /// debit entry recorded against the wallet.
    pub fn withdraw(
        &self,
        wallet_id: WalletId,
        amount: i64,
        provider: Option<&str>,
    ) -> Result<Entry> {
        self.observe("withdraw", || {
            check_amount(amount)?;
            self.require_wallet(wallet_id)?;
            let provider_id = provider.unwrap_or(&self.options.providers.withdraw_provider);
            let provider = self.provider_wallet(provider_id)?;

            self.post(
                Movement::Withdraw {
                    wallet: wallet_id,
                    provider: provider.id,
                },
                amount,
            )
        })
    }

    /// Move `amount` between two wallets. Returns the sender's debit entry.
    pub fn transfer(&self, from: WalletId, to: WalletId, amount: i64) -> Result<Entry> {
        self.observe("transfer", || {
            check_amount(amount)?;
            if from == to {
                return Err(Error::SelfTransfer(from));
            }
            self.require_wallet(from)?;
            self.require_wallet(to)?;

            self.post(Movement::Transfer { from, to }, amount)
        })
    }

    /// Wallet and every entry recorded against it, newest first
    pub fn get_wallet_with_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<(Wallet, Vec<Entry>)> {
        self.observe("get_wallet", || self.snapshot(wallet_id))
    }

    /// Same as [`Ledger::get_wallet_with_transactions`], looked up by owner
    pub fn get_wallet_by_user(&self, user_id: &str) -> Result<(Wallet, Vec<Entry>)> {
        self.observe("get_wallet", || {
            let wallet = self
                .store
                .get_wallet_by_user(user_id)?
                .ok_or_else(|| Error::NotFound(user_id.to_string()))?;
            self.snapshot(wallet.id)
        })
    }

    /// All wallets, ascending by ID
    pub fn list_wallets(&self) -> Result<Vec<Wallet>> {
        self.store.list_wallets()
    }

    /// Change a wallet's status. Does not affect which operations it may
    /// take part in.
    pub fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        self.observe("set_status", || {
            let mut unit = self.begin(&[wallet_id])?;
            unit.set_status(wallet_id, status)?;
            let committed = unit.commit()?;

            let wallet = committed
                .wallets
                .into_iter()
                .next()
                .ok_or_else(|| Error::wallet_not_found(wallet_id))?;
            tracing::info!(wallet_id = %wallet_id, status = %status, "Wallet status changed");
            Ok(wallet)
        })
    }

    /// Compare a wallet's stored balance with the net of its entries
    pub fn reconcile(&self, wallet_id: WalletId) -> Result<Reconciliation> {
        let (wallet, entries) = self.snapshot(wallet_id)?;
        Ok(self.reconciliation(&wallet, &entries))
    }

    /// Check pairing across the whole log and reconcile every wallet.
    ///
    /// Locks every wallet for the duration of the scan.
    pub fn audit(&self) -> Result<AuditReport> {
        let ids: Vec<WalletId> = self.store.list_wallets()?.iter().map(|w| w.id).collect();
        let unit = self.begin(&ids)?;

        let mut entries = self.store.find_entries(&EntryFilter::default())?;
        entries.sort_by_key(|entry| entry.id);

        let unpaired = unpaired_entries(&entries);

        let mut wallets = Vec::with_capacity(ids.len());
        for id in &ids {
            let wallet = unit.wallet(*id).ok_or_else(|| Error::wallet_not_found(*id))?;
            let own: Vec<Entry> = entries
                .iter()
                .filter(|entry| entry.subject_wallet_id == *id)
                .cloned()
                .collect();
            wallets.push(self.reconciliation(wallet, &own));
        }
        drop(unit);

        let report = AuditReport {
            entry_count: entries.len(),
            unpaired,
            wallets,
        };

        if report.is_clean() {
            tracing::info!(
                wallets = report.wallets.len(),
                entries = report.entry_count,
                "Ledger audit passed"
            );
        } else {
            tracing::warn!(
                unpaired = report.unpaired.len(),
                mismatched = report.mismatched().count(),
                "Ledger audit found inconsistencies"
            );
        }

        Ok(report)
    }

    // Internals

    fn begin(&self, ids: &[WalletId]) -> Result<AtomicUnit<'_, S>> {
        let unit = AtomicUnit::begin(self.store.as_ref(), ids, self.options.lock_timeout)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_lock_wait(unit.lock_wait().as_secs_f64());
        }
        Ok(unit)
    }

    /// Run one movement as its own atomic unit and return the receipt line
    fn post(&self, movement: Movement, amount: i64) -> Result<Entry> {
        let mut unit = self.begin(&[movement.debited(), movement.credited()])?;
        unit.post(movement, amount)?;
        let committed = unit.commit()?;

        let pair = committed
            .pairs
            .into_iter()
            .next()
            .ok_or_else(|| Error::Persistence("commit returned no entries".to_string()))?;

        if let Some(metrics) = &self.metrics {
            metrics.record_entries(2);
        }
        tracing::debug!(
            transaction_type = %movement.transaction_type(),
            debit_wallet = %pair.debit.subject_wallet_id,
            credit_wallet = %pair.credit.subject_wallet_id,
            amount,
            debit_entry = %pair.debit.id,
            credit_entry = %pair.credit.id,
            "Entry pair posted"
        );

        Ok(pair.into_side(movement.receipt_side()))
    }

    fn snapshot(&self, wallet_id: WalletId) -> Result<(Wallet, Vec<Entry>)> {
        let unit = self.begin(&[wallet_id])?;
        let wallet = unit
            .wallet(wallet_id)
            .cloned()
            .ok_or_else(|| Error::wallet_not_found(wallet_id))?;
        let entries = self.store.find_entries(&EntryFilter::subject(wallet_id))?;
        Ok((wallet, entries))
    }

    fn require_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.store
            .get_wallet(wallet_id)?
            .ok_or_else(|| Error::wallet_not_found(wallet_id))
    }

    fn provider_wallet(&self, user_id: &str) -> Result<Wallet> {
        match self.store.get_wallet_by_user(user_id)? {
            Some(wallet) if wallet.is_provider() => Ok(wallet),
            _ => Err(Error::ProviderNotFound(user_id.to_string())),
        }
    }

    fn reconciliation(&self, wallet: &Wallet, entries: &[Entry]) -> Reconciliation {
        let opening_balance = if wallet.is_provider() {
            self.options.providers.seed_balance_of(&wallet.user_id)
        } else {
            0
        };
        Reconciliation {
            wallet_id: wallet.id,
            balance: wallet.balance,
            opening_balance,
            ledger_net: entries.iter().map(|e| i128::from(e.signed_amount())).sum(),
        }
    }

    fn observe<T>(&self, kind: &'static str, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = op();

        if let Err(err) = &result {
            tracing::warn!(kind, error = %err, "Ledger operation rejected");
        }
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) => err.label(),
            };
            metrics.record_operation(kind, outcome, started.elapsed().as_secs_f64());
        }

        result
    }
}

fn check_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

/// Entries (in ID order) that are not half of a mirrored debit/credit pair
fn unpaired_entries(entries: &[Entry]) -> Vec<EntryId> {
    let mut unpaired = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        match entries.get(i + 1) {
            Some(next)
                if entries[i].operation_type == OperationType::Debit
                    && entries[i].mirrors(next) =>
            {
                i += 2;
            }
            _ => {
                unpaired.push(entries[i].id);
                i += 1;
            }
        }
    }
    unpaired
}

/// Stored balance against the transaction log for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Wallet
    pub wallet_id: WalletId,

    /// Stored balance
    pub balance: i64,

    /// Balance the wallet held before any entry (provider seed, else 0)
    pub opening_balance: i64,

    /// Credits minus debits over the wallet's entries
    pub ledger_net: i128,
}

impl Reconciliation {
    /// Whether the stored balance equals opening balance plus ledger net
    pub fn is_consistent(&self) -> bool {
        i128::from(self.opening_balance) + self.ledger_net == i128::from(self.balance)
    }
}

/// Result of a full-ledger audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Number of entries scanned
    pub entry_count: usize,

    /// Entries without a matching opposite line
    pub unpaired: Vec<EntryId>,

    /// Per-wallet reconciliation, ascending by wallet ID
    pub wallets: Vec<Reconciliation>,
}

impl AuditReport {
    /// Wallets whose balance disagrees with the log
    pub fn mismatched(&self) -> impl Iterator<Item = &Reconciliation> {
        self.wallets.iter().filter(|r| !r.is_consistent())
    }

    /// No unpaired entries, every wallet reconciles, no negative balance
    pub fn is_clean(&self) -> bool {
        self.unpaired.is_empty()
            && self.mismatched().next().is_none()
            && self.wallets.iter().all(|r| r.balance >= 0)
    }
}

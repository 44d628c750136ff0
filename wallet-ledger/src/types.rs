//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer minor units for money)
//!
//! The string spellings returned by `as_str` are the values stored in the
//! `wallets` and `transactions` tables and must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Wallet identifier (surrogate key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalletId(i64);

impl WalletId {
    /// Create new wallet ID
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw key value
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction entry identifier (sequential)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(i64);

impl EntryId {
    /// Create new entry ID
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw key value
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Implements `as_str`, `Display` and `FromStr` over the persisted spelling.
macro_rules! persisted_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Persisted spelling
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::Parse(format!("unknown {}: {}", $what, other))),
                }
            }
        }
    };
}

/// Account type of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// End-user wallet
    User,
    /// System counterparty for external money movement
    Provider,
}

persisted_enum!(AccountType, "account type", {
    User => "user",
    Provider => "provider",
});

/// Wallet status (informational, the engine does not gate on it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Default for new wallets
    #[default]
    Active,
    /// Closed by the owner
    Inactive,
    /// Frozen by an operator
    Suspended,
}

persisted_enum!(WalletStatus, "wallet status", {
    Active => "active",
    Inactive => "inactive",
    Suspended => "suspended",
});

/// Business meaning of a posted pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Provider -> wallet
    Deposit,
    /// Wallet -> provider
    Withdraw,
    /// Wallet -> wallet
    Transfer,
}

persisted_enum!(TransactionType, "transaction type", {
    Deposit => "deposit",
    Withdraw => "withdraw",
    Transfer => "transfer",
});

/// Side of a ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Decreases the subject balance
    Debit,
    /// Increases the subject balance
    Credit,
}

persisted_enum!(OperationType, "operation type", {
    Debit => "debit",
    Credit => "credit",
});

impl OperationType {
    /// The other side of a pair
    pub fn opposite(self) -> Self {
        match self {
            OperationType::Debit => OperationType::Credit,
            OperationType::Credit => OperationType::Debit,
        }
    }
}

/// Entry status
///
/// The engine only writes `Completed`; the other states exist in the
/// stored schema for entries written by other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Schema default
    #[default]
    Pending,
    /// Posted and applied to balances
    Completed,
    /// Not applied
    Failed,
    /// Withdrawn before applying
    Cancelled,
}

persisted_enum!(EntryStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

/// Stored wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Surrogate key
    pub id: WalletId,

    /// Owning principal (user or provider reference), unique
    pub user_id: String,

    /// Account type
    pub acnt_type: AccountType,

    /// Balance in minor units, never negative
    pub balance: i64,

    /// Status
    pub status: WalletStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Whether this wallet may act as a deposit/withdraw counterparty
    pub fn is_provider(&self) -> bool {
        self.acnt_type == AccountType::Provider
    }
}

/// Wallet creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWallet {
    /// Owning principal
    pub user_id: String,

    /// Account type
    pub acnt_type: AccountType,

    /// Initial status
    pub status: WalletStatus,

    /// Opening balance (only provider seeding sets this)
    pub balance: i64,
}

impl NewWallet {
    /// User wallet with zero balance
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            acnt_type: AccountType::User,
            status: WalletStatus::Active,
            balance: 0,
        }
    }

    /// Provider wallet with zero balance
    pub fn provider(user_id: impl Into<String>) -> Self {
        Self {
            acnt_type: AccountType::Provider,
            ..Self::user(user_id)
        }
    }

    /// Set opening balance
    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }
}

/// A single posted ledger line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Sequential ID
    pub id: EntryId,

    /// Wallet this line is recorded against
    pub subject_wallet_id: WalletId,

    /// Counterparty wallet
    pub object_wallet_id: Option<WalletId>,

    /// Business meaning
    pub transaction_type: TransactionType,

    /// Debit or credit
    pub operation_type: OperationType,

    /// Amount in minor units, always positive
    pub amount: i64,

    /// Status
    pub status: EntryStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Effect on the subject balance (credit +, debit -)
    pub fn signed_amount(&self) -> i64 {
        match self.operation_type {
            OperationType::Credit => self.amount,
            OperationType::Debit => -self.amount,
        }
    }

    /// Whether `other` is the matching opposite line of the same pair
    pub fn mirrors(&self, other: &Entry) -> bool {
        self.amount == other.amount
            && self.transaction_type == other.transaction_type
            && self.operation_type == other.operation_type.opposite()
            && self.object_wallet_id == Some(other.subject_wallet_id)
            && other.object_wallet_id == Some(self.subject_wallet_id)
    }
}

/// Ledger line staged inside an atomic unit, before the store assigns
/// its ID and timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    /// Wallet this line is recorded against
    pub subject_wallet_id: WalletId,

    /// Counterparty wallet
    pub object_wallet_id: WalletId,

    /// Business meaning
    pub transaction_type: TransactionType,

    /// Debit or credit
    pub operation_type: OperationType,

    /// Amount in minor units
    pub amount: i64,
}

impl NewEntry {
    /// Materialize with store-assigned ID and timestamp
    pub fn into_entry(self, id: EntryId, now: DateTime<Utc>) -> Entry {
        Entry {
            id,
            subject_wallet_id: self.subject_wallet_id,
            object_wallet_id: Some(self.object_wallet_id),
            transaction_type: self.transaction_type,
            operation_type: self.operation_type,
            amount: self.amount,
            status: EntryStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Direction of a balance-affecting operation
///
/// Every variant names exactly one debited and one credited wallet, so a
/// pair with mismatched sides cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Movement {
    /// Provider is debited, wallet is credited
    Deposit {
        /// Source provider wallet
        provider: WalletId,
        /// Receiving wallet
        wallet: WalletId,
    },
    /// Wallet is debited, provider is credited
    Withdraw {
        /// Paying wallet
        wallet: WalletId,
        /// Sink provider wallet
        provider: WalletId,
    },
    /// Sender is debited, receiver is credited
    Transfer {
        /// Sender
        from: WalletId,
        /// Receiver
        to: WalletId,
    },
}

impl Movement {
    /// Transaction type stamped on both lines
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Movement::Deposit { .. } => TransactionType::Deposit,
            Movement::Withdraw { .. } => TransactionType::Withdraw,
            Movement::Transfer { .. } => TransactionType::Transfer,
        }
    }

    /// Wallet whose balance decreases
    pub fn debited(&self) -> WalletId {
        match *self {
            Movement::Deposit { provider, .. } => provider,
            Movement::Withdraw { wallet, .. } => wallet,
            Movement::Transfer { from, .. } => from,
        }
    }

    /// Wallet whose balance increases
    pub fn credited(&self) -> WalletId {
        match *self {
            Movement::Deposit { wallet, .. } => wallet,
            Movement::Withdraw { provider, .. } => provider,
            Movement::Transfer { to, .. } => to,
        }
    }

    /// Side of the pair returned to the caller: the line recorded
    /// against the user-facing wallet
    pub fn receipt_side(&self) -> OperationType {
        match self {
            Movement::Deposit { .. } => OperationType::Credit,
            Movement::Withdraw { .. } | Movement::Transfer { .. } => OperationType::Debit,
        }
    }

    /// Both lines of the pair, debit first
    pub fn legs(&self, amount: i64) -> [NewEntry; 2] {
        let (debited, credited) = (self.debited(), self.credited());
        let transaction_type = self.transaction_type();
        [
            NewEntry {
                subject_wallet_id: debited,
                object_wallet_id: credited,
                transaction_type,
                operation_type: OperationType::Debit,
                amount,
            },
            NewEntry {
                subject_wallet_id: credited,
                object_wallet_id: debited,
                transaction_type,
                operation_type: OperationType::Credit,
                amount,
            },
        ]
    }
}

/// The two committed lines of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPair {
    /// Debit line
    pub debit: Entry,
    /// Credit line
    pub credit: Entry,
}

impl EntryPair {
    /// Take the line on the given side
    pub fn into_side(self, side: OperationType) -> Entry {
        match side {
            OperationType::Debit => self.debit,
            OperationType::Credit => self.credit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_spellings() {
        assert_eq!(AccountType::Provider.as_str(), "provider");
        assert_eq!(WalletStatus::Suspended.to_string(), "suspended");
        assert_eq!(TransactionType::Withdraw.as_str(), "withdraw");
        assert_eq!(OperationType::Credit.as_str(), "credit");
        assert_eq!(EntryStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(WalletStatus::default(), WalletStatus::Active);
        assert_eq!(EntryStatus::default(), EntryStatus::Pending);
    }

    #[test]
    fn test_parse_persisted_values() {
        assert_eq!("user".parse::<AccountType>().unwrap(), AccountType::User);
        assert_eq!(
            "transfer".parse::<TransactionType>().unwrap(),
            TransactionType::Transfer
        );
        assert!("Debit".parse::<OperationType>().is_err());
        assert!("closed".parse::<WalletStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&OperationType::Debit).unwrap();
        assert_eq!(json, "\"debit\"");
    }

    #[test]
    fn test_movement_legs() {
        let deposit = Movement::Deposit {
            provider: WalletId::new(1),
            wallet: WalletId::new(7),
        };
        let [debit, credit] = deposit.legs(5000);
        assert_eq!(debit.subject_wallet_id, WalletId::new(1));
        assert_eq!(debit.object_wallet_id, WalletId::new(7));
        assert_eq!(debit.operation_type, OperationType::Debit);
        assert_eq!(credit.subject_wallet_id, WalletId::new(7));
        assert_eq!(credit.object_wallet_id, WalletId::new(1));
        assert_eq!(credit.transaction_type, TransactionType::Deposit);
        assert_eq!(deposit.receipt_side(), OperationType::Credit);

        let withdraw = Movement::Withdraw {
            wallet: WalletId::new(7),
            provider: WalletId::new(2),
        };
        assert_eq!(withdraw.debited(), WalletId::new(7));
        assert_eq!(withdraw.credited(), WalletId::new(2));
        assert_eq!(withdraw.receipt_side(), OperationType::Debit);
    }

    #[test]
    fn test_entry_mirrors() {
        let now = Utc::now();
        let movement = Movement::Transfer {
            from: WalletId::new(3),
            to: WalletId::new(4),
        };
        let [debit, credit] = movement.legs(2000);
        let debit = debit.into_entry(EntryId::new(1), now);
        let credit = credit.into_entry(EntryId::new(2), now);

        assert!(debit.mirrors(&credit));
        assert!(credit.mirrors(&debit));
        assert_eq!(debit.signed_amount(), -2000);
        assert_eq!(credit.signed_amount(), 2000);
        assert_eq!(credit.status, EntryStatus::Completed);

        let mut skewed = credit.clone();
        skewed.amount = 1999;
        assert!(!debit.mirrors(&skewed));
    }
}

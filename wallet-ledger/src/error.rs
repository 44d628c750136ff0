//! Error types for the ledger

use thiserror::Error;

use crate::types::WalletId;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every failure raised inside an atomic unit aborts the whole unit: no
/// entry and no balance change from a failed operation is ever stored.
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is zero or negative
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    /// Referenced wallet does not exist
    #[error("Wallet not found: {0}")]
    NotFound(String),

    /// Provider wallet missing or not of provider type
    #[error("Provider wallet not found: {0}")]
    ProviderNotFound(String),

    /// Debit would drive a balance below zero
    #[error("Insufficient funds in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Wallet being debited
        wallet_id: WalletId,
        /// Balance read under lock
        balance: i64,
        /// Amount requested
        requested: i64,
    },

    /// Sender and receiver are the same wallet
    #[error("Cannot transfer to the same wallet: {0}")]
    SelfTransfer(WalletId),

    /// Another wallet already belongs to this principal
    #[error("Wallet already exists for user: {0}")]
    DuplicateWallet(String),

    /// Storage failure inside the atomic unit (I/O, overflow)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Row lock not granted in time; a persistence failure the caller may retry
    #[error("Persistence error: timed out waiting for row lock on wallet {0}")]
    LockTimeout(WalletId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Unknown persisted value
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wallet lookup failure
    pub fn wallet_not_found(id: WalletId) -> Self {
        Error::NotFound(id.to_string())
    }

    /// Lock wait exceeded
    pub fn lock_timeout(id: WalletId) -> Self {
        Error::LockTimeout(id)
    }

    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::NotFound(_) => "not_found",
            Error::ProviderNotFound(_) => "provider_not_found",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::SelfTransfer(_) => "self_transfer",
            Error::DuplicateWallet(_) => "duplicate_wallet",
            Error::Persistence(_)
            | Error::LockTimeout(_)
            | Error::Serialization(_)
            | Error::Io(_) => "persistence",
            Error::Parse(_) => "parse",
            Error::Config(_) => "config",
        }
    }

    /// Whether resubmitting the same call may succeed.
    ///
    /// Only lock-wait timeouts qualify. Operations are not idempotent, so
    /// a caller must be sure the first attempt was rolled back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = Error::InsufficientFunds {
            wallet_id: WalletId::new(2),
            balance: 5000,
            requested: 6000,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in wallet 2: balance 5000, requested 6000"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::lock_timeout(WalletId::new(1)).is_retryable());
        assert!(!Error::Persistence("disk full".into()).is_retryable());
        assert!(!Error::Persistence("timed out waiting for disk".into()).is_retryable());
        assert!(!Error::InvalidAmount(0).is_retryable());
    }

    #[test]
    fn test_lock_timeout_message() {
        assert_eq!(
            Error::lock_timeout(WalletId::new(4)).to_string(),
            "Persistence error: timed out waiting for row lock on wallet 4"
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(Error::SelfTransfer(WalletId::new(1)).label(), "self_transfer");
        assert_eq!(Error::lock_timeout(WalletId::new(1)).label(), "persistence");
        assert_eq!(Error::NotFound("9".into()).label(), "not_found");
    }
}

//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Well-known deposit source wallet
pub const DEPOSIT_PROVIDER: &str = "deposit-provider-master";

/// Well-known withdrawal sink wallet
pub const WITHDRAW_PROVIDER: &str = "withdraw-provider-master";

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// Row locking configuration
    pub locking: LockingConfig,

    /// Provider registry
    pub providers: ProviderConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wallet-ledger"),
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics_listen_addr: "0.0.0.0:9090".to_string(),
            locking: LockingConfig::default(),
            providers: ProviderConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Row locking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Maximum wait for a wallet row lock (milliseconds)
    pub lock_timeout_ms: u64,
}

impl LockingConfig {
    /// Lock wait as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

/// Provider registry: the two reserved counterparty wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Owner reference of the deposit source
    pub deposit_provider: String,

    /// Owner reference of the withdrawal sink
    pub withdraw_provider: String,

    /// Seed balance of the deposit source (minor units)
    pub deposit_seed_balance: i64,

    /// Seed balance of the withdrawal sink (minor units)
    pub withdraw_seed_balance: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            deposit_provider: DEPOSIT_PROVIDER.to_string(),
            withdraw_provider: WITHDRAW_PROVIDER.to_string(),
            deposit_seed_balance: 1_000_000_000_000_000, // 10^13 major units
            withdraw_seed_balance: 0,
        }
    }
}

impl ProviderConfig {
    /// Configured seed balance for a provider, zero for anything else
    pub fn seed_balance_of(&self, user_id: &str) -> i64 {
        if user_id == self.deposit_provider {
            self.deposit_seed_balance
        } else if user_id == self.withdraw_provider {
            self.withdraw_seed_balance
        } else {
            0
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync the WAL on every commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("LEDGER_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.locking.lock_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_LOCK_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(provider) = std::env::var("LEDGER_DEPOSIT_PROVIDER") {
            config.providers.deposit_provider = provider;
        }

        if let Ok(provider) = std::env::var("LEDGER_WITHDRAW_PROVIDER") {
            config.providers.withdraw_provider = provider;
        }

        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.locking.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "locking.lock_timeout_ms must be positive".to_string(),
            ));
        }

        let providers = &self.providers;
        if providers.deposit_provider.is_empty() || providers.withdraw_provider.is_empty() {
            return Err(crate::Error::Config(
                "provider identifiers must not be empty".to_string(),
            ));
        }
        if providers.deposit_provider == providers.withdraw_provider {
            return Err(crate::Error::Config(
                "deposit and withdraw providers must be distinct wallets".to_string(),
            ));
        }
        if providers.deposit_seed_balance < 0 || providers.withdraw_seed_balance < 0 {
            return Err(crate::Error::Config(
                "provider seed balances must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "wallet-ledger");
        assert_eq!(config.providers.deposit_provider, "deposit-provider-master");
        assert_eq!(config.providers.withdraw_provider, "withdraw-provider-master");
        assert_eq!(config.providers.withdraw_seed_balance, 0);
        assert_eq!(config.locking.lock_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/ledger"

            [locking]
            lock_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ledger"));
        assert_eq!(config.locking.lock_timeout_ms, 250);
        assert_eq!(config.providers.deposit_provider, DEPOSIT_PROVIDER);
        assert!(config.rocksdb.sync_writes);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "[providers]\nwithdraw_seed_balance = 42\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.providers.withdraw_seed_balance, 42);

        std::fs::write(&path, "locking = 3").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.locking.lock_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.withdraw_provider = config.providers.deposit_provider.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.deposit_seed_balance = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_balance_of() {
        let providers = ProviderConfig::default();
        assert_eq!(
            providers.seed_balance_of(DEPOSIT_PROVIDER),
            providers.deposit_seed_balance
        );
        assert_eq!(providers.seed_balance_of(WITHDRAW_PROVIDER), 0);
        assert_eq!(providers.seed_balance_of("alice"), 0);
    }
}

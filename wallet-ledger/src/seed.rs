//! Provider registry bootstrap
//!
//! Creates the deposit source and withdrawal sink wallets if they do not
//! exist yet. Seed balances are written directly onto the wallet row;
//! reconciliation accounts for them through [`ProviderConfig`].

use crate::{
    config::ProviderConfig,
    error::{Error, Result},
    storage::WalletStore,
    types::{NewWallet, Wallet},
};

/// Ensure both provider wallets exist. Returns `[deposit, withdraw]`.
///
/// Existing provider wallets are returned untouched, so this is safe to
/// run on every start.
pub fn ensure_providers<S: WalletStore + ?Sized>(
    store: &S,
    providers: &ProviderConfig,
) -> Result<[Wallet; 2]> {
    let deposit =
        ensure_provider(store, &providers.deposit_provider, providers.deposit_seed_balance)?;
    let withdraw =
        ensure_provider(store, &providers.withdraw_provider, providers.withdraw_seed_balance)?;
    Ok([deposit, withdraw])
}

fn ensure_provider<S: WalletStore + ?Sized>(store: &S, user_id: &str, seed: i64) -> Result<Wallet> {
    if let Some(existing) = store.get_wallet_by_user(user_id)? {
        return check_provider(existing);
    }

    match store.insert_wallet(NewWallet::provider(user_id).with_balance(seed)) {
        Ok(wallet) => {
            tracing::info!(
                wallet_id = %wallet.id,
                user_id,
                balance = seed,
                "Provider wallet seeded"
            );
            Ok(wallet)
        }
        // Lost a race with a concurrent seeder
        Err(Error::DuplicateWallet(_)) => store
            .get_wallet_by_user(user_id)?
            .ok_or_else(|| Error::NotFound(user_id.to_string()))
            .and_then(check_provider),
        Err(err) => Err(err),
    }
}

fn check_provider(wallet: Wallet) -> Result<Wallet> {
    if wallet.is_provider() {
        Ok(wallet)
    } else {
        Err(Error::Config(format!(
            "wallet {} owned by {} is not a provider wallet",
            wallet.id, wallet.user_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEPOSIT_PROVIDER, WITHDRAW_PROVIDER};
    use crate::storage::MemoryStore;
    use crate::types::{AccountType, WalletStatus};

    #[test]
    fn test_seed_defaults() {
        let store = MemoryStore::new();
        let providers = ProviderConfig::default();

        let [deposit, withdraw] = ensure_providers(&store, &providers).unwrap();
        assert_eq!(deposit.user_id, DEPOSIT_PROVIDER);
        assert_eq!(deposit.acnt_type, AccountType::Provider);
        assert_eq!(deposit.status, WalletStatus::Active);
        assert_eq!(deposit.balance, 1_000_000_000_000_000);
        assert_eq!(withdraw.user_id, WITHDRAW_PROVIDER);
        assert_eq!(withdraw.balance, 0);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let providers = ProviderConfig::default();

        let first = ensure_providers(&store, &providers).unwrap();
        let second = ensure_providers(&store, &providers).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_wallets().unwrap().len(), 2);
    }

    #[test]
    fn test_user_wallet_squatting_provider_id() {
        let store = MemoryStore::new();
        store.insert_wallet(NewWallet::user(DEPOSIT_PROVIDER)).unwrap();

        let err = ensure_providers(&store, &ProviderConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

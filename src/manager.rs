/// Wallet Manager - Orchestration Layer
///
/// Owns the account registry, the ledger handle and optional storage, and
/// delegates to the wallet, transaction and view modules.
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::{ChannelKey, KeyManager};
use crate::ledger::{Ledger, LedgerTransaction};
use crate::storage::{AccountRecord, Metadata, Storage};
use crate::transaction::{self, ClaimRequest, ClaimResult, SendRequest, SupportRequest};
use crate::view::{
    Balance, ClaimRecord, HistoryEntry, LedgerView, ListFilter, Listing, SupportRecord, UtxoRecord,
};
use crate::wallet::{
    sync_account, sync_wallet, Account, AccountDetails, AccountSettings, AddressRecord, Branch,
    SyncReport, Wallet,
};

pub const DEFAULT_WALLET_NAME: &str = "default_wallet";

#[derive(Debug, Clone, Default)]
pub struct AccountListOptions {
    pub account_id: Option<String>,
    pub show_seed: bool,
    /// Include the balance, claim and support deposits counted
    pub include_claims: bool,
}

pub struct WalletManager {
    pub config: WalletConfig,
    wallet: RwLock<Wallet>,
    ledger: Arc<dyn Ledger>,
    storage: Option<Storage>,
}

impl WalletManager {
    // ============================================================================
    // Constructor
    // ============================================================================

    /// In-memory wallet without persistence
    pub fn new(config: WalletConfig, ledger: Arc<dyn Ledger>) -> Result<Self, WalletError> {
        config.validate()?;
        Ok(Self {
            wallet: RwLock::new(Wallet::new(DEFAULT_WALLET_NAME, config.clone())),
            config,
            ledger,
            storage: None,
        })
    }

    /// Create WalletManager with custom storage (for testing)
    pub fn new_with_storage(
        config: WalletConfig,
        ledger: Arc<dyn Ledger>,
        storage: Storage,
    ) -> Result<Self, WalletError> {
        let mut manager = Self::new(config, ledger)?;
        manager.storage = Some(storage);
        Ok(manager)
    }

    /// Load a persisted wallet; channel key cursors come back unprimed
    pub async fn load(
        config: WalletConfig,
        ledger: Arc<dyn Ledger>,
        storage: Storage,
        wallet_name: &str,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let meta = storage.load_metadata(wallet_name)?;
        if meta.network != config.network.to_string() {
            return Err(WalletError::Validation(format!(
                "wallet '{}' was saved on {}, configuration is {}",
                wallet_name, meta.network, config.network
            )));
        }

        let mut wallet = Wallet::new(wallet_name, config.clone());
        for account_id in &meta.account_order {
            let record = storage.load_account(wallet_name, account_id)?;
            let account = wallet.insert(restore_account(&record, &config)?)?;
            account
                .channel_keys()
                .restore(record.channel_keys_last_known)
                .await;
        }
        wallet.restore_default(meta.default_account_id.as_deref())?;
        log::info!(
            "Loaded wallet '{}' with {} account(s)",
            wallet_name,
            wallet.accounts().len()
        );

        Ok(Self {
            config,
            wallet: RwLock::new(wallet),
            ledger,
            storage: Some(storage),
        })
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub async fn wallet(&self) -> RwLockReadGuard<'_, Wallet> {
        self.wallet.read().await
    }

    // ============================================================================
    // Persistence
    // ============================================================================

    pub async fn save(&self) -> Result<(), WalletError> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| WalletError::Validation("no storage configured".into()))?;
        let wallet = self.wallet.read().await;
        let name = wallet.name();

        storage.create_wallet(name)?;
        let created_at = storage
            .load_metadata(name)
            .map(|meta| meta.created_at)
            .unwrap_or_else(|_| Utc::now());

        let mut kept = HashSet::new();
        for account in wallet.accounts() {
            storage.save_account(name, &account_record(account).await)?;
            kept.insert(account.id().to_string());
        }
        for stale in storage.list_accounts(name)? {
            if !kept.contains(&stale) {
                storage.delete_account(name, &stale)?;
            }
        }

        storage.save_metadata(
            name,
            &Metadata {
                name: name.to_string(),
                created_at,
                network: self.config.network.to_string(),
                account_order: wallet.accounts().iter().map(|a| a.id().to_string()).collect(),
                default_account_id: wallet.default_account_id().map(str::to_string),
            },
        )?;
        log::info!("Saved wallet '{}' ({} account(s))", name, kept.len());
        Ok(())
    }

    // ============================================================================
    // Account Management (delegates to wallet::registry)
    // ============================================================================

    pub async fn account(&self, account_id: Option<&str>) -> Result<Arc<Account>, WalletError> {
        Ok(self.wallet.read().await.get_or_default(account_id)?.clone())
    }

    pub async fn account_list(
        &self,
        options: &AccountListOptions,
    ) -> Result<Listing<AccountDetails>, WalletError> {
        let wallet = self.wallet.read().await;
        let accounts: Vec<Arc<Account>> = match &options.account_id {
            Some(id) => vec![wallet.get(id)?.clone()],
            None => wallet.accounts().to_vec(),
        };

        let view = LedgerView::new(&wallet, self.ledger.as_ref());
        let mut items = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let mut details = account.details(wallet.is_default(account.id()), options.show_seed);
            if options.include_claims {
                details.balance = Some(view.balance(Some(account.id())).await?.total);
            }
            items.push(details);
        }
        Ok(Listing {
            total: items.len(),
            items,
        })
    }

    pub async fn account_create(
        &self,
        name: &str,
        settings: &AccountSettings,
    ) -> Result<AccountDetails, WalletError> {
        let mut wallet = self.wallet.write().await;
        let account = wallet.create_account(name, settings)?;
        Ok(account.details(wallet.is_default(account.id()), false))
    }

    pub async fn account_add(
        &self,
        name: &str,
        seed: &str,
        settings: &AccountSettings,
    ) -> Result<AccountDetails, WalletError> {
        let mut wallet = self.wallet.write().await;
        let account = wallet.add_account_from_seed(name, seed, settings)?;
        Ok(account.details(wallet.is_default(account.id()), false))
    }

    pub async fn account_add_keys(
        &self,
        name: &str,
        extended_key: &str,
        settings: &AccountSettings,
    ) -> Result<AccountDetails, WalletError> {
        let mut wallet = self.wallet.write().await;
        let account = wallet.add_account_from_extended_key(name, extended_key, settings)?;
        Ok(account.details(wallet.is_default(account.id()), false))
    }

    pub async fn account_remove(&self, account_id: &str) -> Result<AccountDetails, WalletError> {
        let mut wallet = self.wallet.write().await;
        let removed = wallet.remove_account(account_id)?;
        Ok(removed.details(false, false))
    }

    pub async fn account_set(
        &self,
        account_id: &str,
        settings: &AccountSettings,
    ) -> Result<AccountDetails, WalletError> {
        let mut wallet = self.wallet.write().await;
        let account = wallet.update_account(account_id, settings)?;
        Ok(account.details(wallet.is_default(account.id()), false))
    }

    pub async fn account_balance(&self, account_id: Option<&str>) -> Result<Balance, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref())
            .balance(account_id)
            .await
    }

    // ============================================================================
    // Address Management
    // ============================================================================

    /// Lowest usable receiving address of the account
    pub async fn address_unused(&self, account_id: Option<&str>) -> Result<String, WalletError> {
        self.account(account_id)
            .await?
            .address_generator()
            .get_or_create_usable_address(Branch::Receiving)
    }

    pub async fn address_list(&self, account_id: Option<&str>) -> Result<Vec<AddressRecord>, WalletError> {
        Ok(self.account(account_id).await?.address_records())
    }

    // ============================================================================
    // Channel Keys
    // ============================================================================

    pub async fn generate_channel_key(&self, account_id: Option<&str>) -> Result<ChannelKey, WalletError> {
        let account = self.account(account_id).await?;
        account
            .channel_keys()
            .generate_next_key(self.ledger.as_ref())
            .await
    }

    pub async fn ensure_channel_keys_primed(&self, account_id: Option<&str>) -> Result<u32, WalletError> {
        let account = self.account(account_id).await?;
        account
            .channel_keys()
            .ensure_cache_primed(self.ledger.as_ref())
            .await
    }

    pub async fn channel_keys_last_known(&self, account_id: Option<&str>) -> Result<u32, WalletError> {
        Ok(self.account(account_id).await?.channel_keys().last_known().await)
    }

    // ============================================================================
    // Transactions (delegates to transaction)
    // ============================================================================

    pub async fn account_send(&self, request: SendRequest) -> Result<LedgerTransaction, WalletError> {
        let wallet = self.wallet.read().await;
        transaction::send(&wallet, self.ledger.as_ref(), request).await
    }

    pub async fn channel_create(&self, request: ClaimRequest) -> Result<ClaimResult, WalletError> {
        let wallet = self.wallet.read().await;
        transaction::create_channel(&wallet, self.ledger.as_ref(), request).await
    }

    pub async fn stream_create(&self, request: ClaimRequest) -> Result<ClaimResult, WalletError> {
        let wallet = self.wallet.read().await;
        transaction::create_stream(&wallet, self.ledger.as_ref(), request).await
    }

    pub async fn support_create(&self, request: SupportRequest) -> Result<ClaimResult, WalletError> {
        let wallet = self.wallet.read().await;
        transaction::create_support(&wallet, self.ledger.as_ref(), request).await
    }

    pub async fn wait_for_confirmation(
        &self,
        tx: &LedgerTransaction,
        poll_interval: Duration,
    ) -> Result<u64, WalletError> {
        transaction::wait_for_confirmation(self.ledger.as_ref(), tx, poll_interval).await
    }

    // ============================================================================
    // Sync
    // ============================================================================

    pub async fn sync_accounts(&self) -> Result<SyncReport, WalletError> {
        let wallet = self.wallet.read().await;
        sync_wallet(&wallet, self.ledger.as_ref()).await
    }

    pub async fn sync_account(&self, account_id: Option<&str>) -> Result<SyncReport, WalletError> {
        let account = self.account(account_id).await?;
        sync_account(&account, self.ledger.as_ref()).await
    }

    /// Subscribe to every current address and sync on each notification
    ///
    /// Addresses generated after the watcher starts are not watched; start
    /// a new watcher to include them.
    pub async fn spawn_address_watcher(self: &Arc<Self>) -> Result<JoinHandle<()>, WalletError> {
        let addresses = self.wallet.read().await.all_addresses();
        let mut subscriptions = Vec::with_capacity(addresses.len());
        for address in &addresses {
            subscriptions.push(self.ledger.subscribe(address).await?);
        }
        log::info!("Watching {} address(es)", addresses.len());

        let mut updates = stream::select_all(subscriptions);
        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(txid) = updates.next().await {
                log::debug!("Activity on a watched address: {}", txid);
                if let Err(e) = manager.sync_accounts().await {
                    log::warn!("Sync after {} failed: {}", txid, e);
                }
            }
        }))
    }

    // ============================================================================
    // Listings (delegates to view)
    // ============================================================================

    pub async fn utxo_list(&self, filter: &ListFilter) -> Result<Listing<UtxoRecord>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_utxos(filter).await
    }

    pub async fn claim_list(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_claims(filter).await
    }

    pub async fn channel_list(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_channels(filter).await
    }

    pub async fn stream_list(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_streams(filter).await
    }

    pub async fn support_list(&self, filter: &ListFilter) -> Result<Listing<SupportRecord>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_supports(filter).await
    }

    pub async fn transaction_list(&self, filter: &ListFilter) -> Result<Listing<HistoryEntry>, WalletError> {
        let wallet = self.wallet.read().await;
        LedgerView::new(&wallet, self.ledger.as_ref()).list_history(filter).await
    }
}

async fn account_record(account: &Account) -> AccountRecord {
    let keys = account.keys();
    AccountRecord {
        id: account.id().to_string(),
        name: account.name(),
        seed: keys.seed_phrase(),
        private_key: keys.xprv.map(|xprv| xprv.to_string()),
        public_key: keys.xpub.to_string(),
        receiving: account.address_generator().config(Branch::Receiving),
        change: account.address_generator().config(Branch::Change),
        channel_keys_last_known: account.channel_keys().last_known().await,
        created_at: account.created_at(),
        modified_on: account.modified_on(),
    }
}

fn restore_account(record: &AccountRecord, config: &WalletConfig) -> Result<Account, WalletError> {
    let keys = match (&record.seed, &record.private_key) {
        (Some(seed), _) => KeyManager::from_mnemonic(seed, config)?,
        (None, Some(xprv)) => KeyManager::from_extended_key(xprv, config)?,
        (None, None) => KeyManager::from_extended_key(&record.public_key, config)?,
    };
    if keys.account_id() != record.id {
        return Err(WalletError::Validation(format!(
            "account file {} holds the keys of account {}",
            record.id,
            keys.account_id()
        )));
    }

    Ok(Account::new(record.name.clone(), keys, config, record.receiving, record.change)?
        .with_timestamps(record.created_at, record.modified_on))
}

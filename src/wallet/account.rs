use bitcoin::Network;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

use super::address_generator::{AddressGenerator, AddressRecord, Branch, BranchConfig};
use super::channel_keys::DeterministicChannelKeyManager;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::AccountKeys;
use crate::ledger::{LedgerTransaction, OutputKind};

/// One account: a key hierarchy with its address branches and channel keys
pub struct Account {
    id: String,
    keys: AccountKeys,
    name: RwLock<String>,
    created_at: DateTime<Utc>,
    modified_on: RwLock<DateTime<Utc>>,
    generator: AddressGenerator,
    channel_keys: DeterministicChannelKeyManager,
    /// Transactions already applied to the generator and key manager
    seen_txids: Mutex<HashSet<String>>,
    /// Held from picking a channel key until its channel is broadcast
    channel_publication: tokio::sync::Mutex<()>,
}

/// Serializable account summary returned by listings
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetails {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub watch_only: bool,
    pub receiving: BranchConfig,
    pub change: BranchConfig,
    pub created_at: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    /// Available balance in dewies, filled in on request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        keys: AccountKeys,
        config: &WalletConfig,
        receiving: BranchConfig,
        change: BranchConfig,
    ) -> Result<Self, WalletError> {
        let generator = AddressGenerator::new(keys.xpub, keys.network, receiving, change)?;
        let channel_keys = DeterministicChannelKeyManager::new(
            &keys,
            config.channel_key_scan_gap,
            config.max_channel_key_index,
        )?;
        let now = Utc::now();

        Ok(Self {
            id: keys.account_id(),
            keys,
            name: RwLock::new(name.into()),
            created_at: now,
            modified_on: RwLock::new(now),
            generator,
            channel_keys,
            seen_txids: Mutex::new(HashSet::new()),
            channel_publication: tokio::sync::Mutex::new(()),
        })
    }

    /// Restore persisted timestamps
    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, modified_on: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.modified_on = RwLock::new(modified_on);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
        self.touch();
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }

    pub fn network(&self) -> Network {
        self.keys.network
    }

    pub fn is_watch_only(&self) -> bool {
        self.keys.is_watch_only()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_on(&self) -> DateTime<Utc> {
        *self.modified_on.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address_generator(&self) -> &AddressGenerator {
        &self.generator
    }

    pub fn channel_keys(&self) -> &DeterministicChannelKeyManager {
        &self.channel_keys
    }

    pub fn owns_address(&self, address: &str) -> bool {
        self.generator.contains(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.generator
            .addresses_for_account()
            .into_iter()
            .map(|r| r.address)
            .collect()
    }

    pub fn address_records(&self) -> Vec<AddressRecord> {
        self.generator.addresses_for_account()
    }

    pub fn set_branch_config(&self, branch: Branch, config: BranchConfig) -> Result<(), WalletError> {
        self.generator.set_config(branch, config)?;
        self.touch();
        Ok(())
    }

    fn touch(&self) {
        *self.modified_on.write().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Serialize channel creation so each broadcast uses its own key
    pub async fn lock_channel_publication(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.channel_publication.lock().await
    }

    /// Record what a transaction means for this account
    ///
    /// Marks owned output addresses used and advances the channel key
    /// cursor for owned channel outputs. Applying the same transaction
    /// twice is a no-op; returns whether anything was applied.
    pub async fn apply_transaction(&self, tx: &LedgerTransaction) -> Result<bool, WalletError> {
        if !self
            .seen_txids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tx.txid.clone())
        {
            return Ok(false);
        }

        let result = self.apply_outputs(tx).await;
        if result.is_err() {
            self.seen_txids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&tx.txid);
        }
        result.map(|_| true)
    }

    async fn apply_outputs(&self, tx: &LedgerTransaction) -> Result<(), WalletError> {
        for output in tx.outputs.iter().filter(|o| self.owns_address(&o.address)) {
            self.generator.mark_used(&output.address)?;

            if let OutputKind::Claim {
                channel_public_key_hash: Some(hash),
                ..
            } = &output.kind
            {
                self.channel_keys.observe_published_identity(hash).await?;
            }
        }
        Ok(())
    }

    pub fn details(&self, is_default: bool, show_seed: bool) -> AccountDetails {
        AccountDetails {
            id: self.id.clone(),
            name: self.name(),
            is_default,
            public_key: self.keys.xpub.to_string(),
            seed: if show_seed { self.keys.seed_phrase() } else { None },
            private_key: if show_seed {
                self.keys.xprv.map(|xprv| xprv.to_string())
            } else {
                None
            },
            watch_only: self.is_watch_only(),
            receiving: self.generator.config(Branch::Receiving),
            change: self.generator.config(Branch::Change),
            created_at: self.created_at,
            modified_on: self.modified_on(),
            balance: None,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("keys", &self.keys)
            .finish()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::account::Account;
use super::address_generator::{Branch, BranchConfig};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::{AccountKeys, KeyManager};
use crate::ledger::LedgerTransaction;

/// What happens to the default slot when the default account is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAccountPolicy {
    /// The first remaining account becomes default
    #[serde(alias = "first")]
    FirstRemaining,
    /// No account is default until one is set explicitly
    None,
}

/// Optional account changes for create/add/set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountSettings {
    pub new_name: Option<String>,
    pub default: Option<bool>,
    pub receiving_gap: Option<u32>,
    pub receiving_max_uses: Option<u32>,
    pub change_gap: Option<u32>,
    pub change_max_uses: Option<u32>,
}

impl AccountSettings {
    fn branch_configs(
        &self,
        receiving: BranchConfig,
        change: BranchConfig,
    ) -> Result<(BranchConfig, BranchConfig), WalletError> {
        let receiving = BranchConfig {
            gap: self.receiving_gap.unwrap_or(receiving.gap),
            maximum_uses_per_address: self
                .receiving_max_uses
                .unwrap_or(receiving.maximum_uses_per_address),
        };
        let change = BranchConfig {
            gap: self.change_gap.unwrap_or(change.gap),
            maximum_uses_per_address: self
                .change_max_uses
                .unwrap_or(change.maximum_uses_per_address),
        };
        receiving.validate()?;
        change.validate()?;
        Ok((receiving, change))
    }

    pub fn is_empty(&self) -> bool {
        self.new_name.is_none()
            && self.default.is_none()
            && self.receiving_gap.is_none()
            && self.receiving_max_uses.is_none()
            && self.change_gap.is_none()
            && self.change_max_uses.is_none()
    }
}

/// Ordered collection of accounts with a designated default
///
/// The default account, when there is one, is always at position 0.
pub struct Wallet {
    name: String,
    config: WalletConfig,
    accounts: Vec<Arc<Account>>,
    default_account_id: Option<String>,
}

impl Wallet {
    pub fn new(name: impl Into<String>, config: WalletConfig) -> Self {
        Self {
            name: name.into(),
            config,
            accounts: Vec::new(),
            default_account_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn default_account_id(&self) -> Option<&str> {
        self.default_account_id.as_deref()
    }

    pub fn default_account(&self) -> Result<&Arc<Account>, WalletError> {
        self.default_account_id
            .as_deref()
            .and_then(|id| self.accounts.iter().find(|a| a.id() == id))
            .ok_or_else(|| WalletError::NotFound("wallet has no default account".into()))
    }

    pub fn is_default(&self, account_id: &str) -> bool {
        self.default_account_id.as_deref() == Some(account_id)
    }

    pub fn get(&self, account_id: &str) -> Result<&Arc<Account>, WalletError> {
        self.accounts
            .iter()
            .find(|a| a.id() == account_id)
            .ok_or_else(|| WalletError::NotFound(format!("account {} not found", account_id)))
    }

    /// The given account, or the default one when `account_id` is None
    pub fn get_or_default(&self, account_id: Option<&str>) -> Result<&Arc<Account>, WalletError> {
        match account_id {
            Some(id) => self.get(id),
            None => self.default_account(),
        }
    }

    /// Resolve funding accounts: explicit ids, else `fallback`, else the default
    pub fn funding_accounts(
        &self,
        funding_account_ids: &[String],
        fallback: Option<&str>,
    ) -> Result<Vec<Arc<Account>>, WalletError> {
        if !funding_account_ids.is_empty() {
            return funding_account_ids
                .iter()
                .map(|id| self.get(id).cloned())
                .collect();
        }
        Ok(vec![self.get_or_default(fallback)?.clone()])
    }

    /// Owning account id of every address the wallet has generated
    pub fn address_owners(&self) -> HashMap<String, String> {
        let mut owners = HashMap::new();
        for account in &self.accounts {
            for address in account.addresses() {
                owners.insert(address, account.id().to_string());
            }
        }
        owners
    }

    pub fn all_addresses(&self) -> Vec<String> {
        self.accounts.iter().flat_map(|a| a.addresses()).collect()
    }

    /// Create an account from a fresh random seed
    pub fn create_account(
        &mut self,
        name: &str,
        settings: &AccountSettings,
    ) -> Result<Arc<Account>, WalletError> {
        let keys = KeyManager::generate(&self.config)?;
        self.add_keys(name, keys, settings)
    }

    /// Add an account from an existing seed phrase
    pub fn add_account_from_seed(
        &mut self,
        name: &str,
        seed: &str,
        settings: &AccountSettings,
    ) -> Result<Arc<Account>, WalletError> {
        let keys = KeyManager::from_mnemonic(seed, &self.config)?;
        self.add_keys(name, keys, settings)
    }

    /// Add an account from an account-level xprv or xpub
    pub fn add_account_from_extended_key(
        &mut self,
        name: &str,
        key: &str,
        settings: &AccountSettings,
    ) -> Result<Arc<Account>, WalletError> {
        let keys = KeyManager::from_extended_key(key, &self.config)?;
        self.add_keys(name, keys, settings)
    }

    fn add_keys(
        &mut self,
        name: &str,
        keys: AccountKeys,
        settings: &AccountSettings,
    ) -> Result<Arc<Account>, WalletError> {
        let id = keys.account_id();
        if self.accounts.iter().any(|a| a.id() == id) {
            return Err(WalletError::Conflict(format!("account {} already exists", id)));
        }

        let (receiving, change) = settings.branch_configs(self.config.receiving, self.config.change)?;
        let account = Account::new(name, keys, &self.config, receiving, change)?;
        let account = self.insert(account)?;
        if settings.default == Some(true) {
            self.set_default(account.id())?;
        }
        Ok(account)
    }

    /// Register a constructed account; the first account becomes default
    pub fn insert(&mut self, account: Account) -> Result<Arc<Account>, WalletError> {
        if self.accounts.iter().any(|a| a.id() == account.id()) {
            return Err(WalletError::Conflict(format!(
                "account {} already exists",
                account.id()
            )));
        }

        let account = Arc::new(account);
        self.accounts.push(account.clone());
        if self.accounts.len() == 1 {
            self.default_account_id = Some(account.id().to_string());
        }
        log::info!("Added account {} ({})", account.name(), account.id());
        Ok(account)
    }

    pub fn remove_account(&mut self, account_id: &str) -> Result<Arc<Account>, WalletError> {
        let position = self
            .accounts
            .iter()
            .position(|a| a.id() == account_id)
            .ok_or_else(|| WalletError::NotFound(format!("account {} not found", account_id)))?;

        if self.config.require_account && self.accounts.len() == 1 {
            return Err(WalletError::Conflict(
                "cannot remove the last account of the wallet".into(),
            ));
        }

        let removed = self.accounts.remove(position);
        if self.is_default(account_id) {
            self.default_account_id = match self.config.default_account_policy {
                DefaultAccountPolicy::FirstRemaining => {
                    self.accounts.first().map(|a| a.id().to_string())
                }
                DefaultAccountPolicy::None => None,
            };
            match &self.default_account_id {
                Some(id) => log::info!("Default account removed, {} is now default", id),
                None => log::warn!("Default account removed, wallet has no default account"),
            }
        }
        log::info!("Removed account {} ({})", removed.name(), removed.id());
        Ok(removed)
    }

    /// Make `account_id` the default, moving it to the front
    pub fn set_default(&mut self, account_id: &str) -> Result<(), WalletError> {
        let position = self
            .accounts
            .iter()
            .position(|a| a.id() == account_id)
            .ok_or_else(|| {
                WalletError::Conflict(format!(
                    "account {} is not in this wallet and cannot become default",
                    account_id
                ))
            })?;

        let account = self.accounts.remove(position);
        self.accounts.insert(0, account);
        self.default_account_id = Some(account_id.to_string());
        Ok(())
    }

    /// Reinstate a persisted default, which may be none
    pub fn restore_default(&mut self, account_id: Option<&str>) -> Result<(), WalletError> {
        match account_id {
            Some(id) => self.set_default(id),
            None => {
                self.default_account_id = None;
                Ok(())
            }
        }
    }

    /// Apply settings to an existing account
    ///
    /// Everything is validated before anything changes.
    pub fn update_account(
        &mut self,
        account_id: &str,
        settings: &AccountSettings,
    ) -> Result<Arc<Account>, WalletError> {
        let account = match self.get(account_id) {
            Ok(account) => account.clone(),
            Err(e) if settings.default == Some(true) => {
                log::debug!("Cannot make unknown account default: {}", e);
                return Err(WalletError::Conflict(format!(
                    "account {} is not in this wallet and cannot become default",
                    account_id
                )));
            }
            Err(e) => return Err(e),
        };

        let (receiving, change) = settings.branch_configs(
            account.address_generator().config(Branch::Receiving),
            account.address_generator().config(Branch::Change),
        )?;

        account.set_branch_config(Branch::Receiving, receiving)?;
        account.set_branch_config(Branch::Change, change)?;
        if let Some(name) = &settings.new_name {
            account.set_name(name.clone());
        }
        if settings.default == Some(true) {
            self.set_default(account_id)?;
        }
        Ok(account)
    }

    /// Apply a transaction to every account it touches
    pub async fn apply_transaction(&self, tx: &LedgerTransaction) -> Result<(), WalletError> {
        for account in &self.accounts {
            account.apply_transaction(tx).await?;
        }
        Ok(())
    }
}

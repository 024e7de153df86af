/// Common test utilities for wallet integration tests
///
/// This module provides shared test infrastructure including:
/// - Logger initialisation
/// - Test environment setup and cleanup (temp storage, in-memory ledger)
/// - Funding and block-mining helpers
use std::sync::Arc;
use tempfile::TempDir;

use claim_wallet::ledger::Ledger;
use claim_wallet::{
    AccountSettings, LedgerTransaction, MemoryLedger, Storage, WalletConfig, WalletManager, COIN,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test environment with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub ledger: Arc<MemoryLedger>,
    pub manager: Arc<WalletManager>,
}

impl TestEnvironment {
    pub fn new(test_name: &str) -> anyhow::Result<Self> {
        Self::with_config(test_name, WalletConfig::default())
    }

    pub fn with_config(test_name: &str, config: WalletConfig) -> anyhow::Result<Self> {
        init_logger();

        let temp_dir = TempDir::new()?;
        log::info!("📁 Test directory for {}: {:?}", test_name, temp_dir.path());

        let ledger = Arc::new(MemoryLedger::new());
        let manager = Self::manager_for(&temp_dir, &ledger, config)?;

        Ok(Self {
            temp_dir,
            ledger,
            manager,
        })
    }

    /// Another wallet instance on the same chain and storage directory
    pub fn second_instance(&self) -> anyhow::Result<Arc<WalletManager>> {
        Self::manager_for(&self.temp_dir, &self.ledger, WalletConfig::default())
    }

    fn manager_for(
        temp_dir: &TempDir,
        ledger: &Arc<MemoryLedger>,
        config: WalletConfig,
    ) -> anyhow::Result<Arc<WalletManager>> {
        let storage = Storage::new_with_base_dir(temp_dir.path().to_path_buf());
        let ledger: Arc<dyn Ledger> = ledger.clone();
        Ok(Arc::new(WalletManager::new_with_storage(config, ledger, storage)?))
    }

    pub fn storage(&self) -> Storage {
        Storage::new_with_base_dir(self.temp_dir.path().to_path_buf())
    }

    /// Create the default account and fund it with `coins` whole coins
    pub async fn funded_account(&self, name: &str, coins: u64) -> anyhow::Result<String> {
        let account = self
            .manager
            .account_create(name, &AccountSettings::default())
            .await?;
        self.fund(&self.manager, Some(&account.id), coins).await?;
        Ok(account.id)
    }

    /// Pay `coins` from the faucet to an unused address of the account and confirm it
    pub async fn fund(
        &self,
        manager: &WalletManager,
        account_id: Option<&str>,
        coins: u64,
    ) -> anyhow::Result<LedgerTransaction> {
        let address = manager.address_unused(account_id).await?;
        let tx = self.ledger.fund(&address, coins * COIN)?;
        self.ledger.mine(1);
        manager.sync_accounts().await?;
        Ok(tx)
    }

    pub fn mine(&self, blocks: u64) -> u64 {
        self.ledger.mine(blocks)
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        log::info!("🧹 Cleaning up test environment (temp dir will auto-remove)");
    }
}

use serde::Serialize;

use super::account::Account;
use super::registry::Wallet;
use crate::error::WalletError;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub accounts_synced: usize,
    pub transactions_applied: usize,
    pub addresses_checked: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.accounts_synced += other.accounts_synced;
        self.transactions_applied += other.transactions_applied;
        self.addresses_checked += other.addresses_checked;
    }
}

/// Bring one account up to date with the ledger
///
/// Applies history oldest first. Whenever that extends an address branch
/// the new addresses are fetched too, until no new address appears.
pub async fn sync_account(account: &Account, ledger: &dyn Ledger) -> Result<SyncReport, WalletError> {
    let mut report = SyncReport {
        accounts_synced: 1,
        ..SyncReport::default()
    };

    loop {
        let addresses = account.addresses();
        let history = ledger.get_transaction_history(&addresses).await?;
        report.addresses_checked = addresses.len();

        for tx in &history {
            if account.apply_transaction(tx).await? {
                report.transactions_applied += 1;
            }
        }

        if account.address_generator().len() == addresses.len() {
            break;
        }
        log::debug!(
            "Account {} grew from {} to {} addresses, rescanning",
            account.id(),
            addresses.len(),
            account.address_generator().len()
        );
    }

    log::info!(
        "Synced account {}: {} new transaction(s) over {} address(es)",
        account.id(),
        report.transactions_applied,
        report.addresses_checked
    );
    Ok(report)
}

pub async fn sync_wallet(wallet: &Wallet, ledger: &dyn Ledger) -> Result<SyncReport, WalletError> {
    let mut report = SyncReport::default();
    for account in wallet.accounts() {
        report.merge(sync_account(account, ledger).await?);
    }
    Ok(report)
}

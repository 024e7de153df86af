use serde::Deserialize;

use super::builder::PlannedOutput;
use super::{fund_and_broadcast, Reservations};
use crate::error::WalletError;
use crate::keys::parse_address;
use crate::ledger::{Ledger, LedgerTransaction};
use crate::wallet::Wallet;

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    /// Dewies paid to each address
    pub amount: u64,
    pub addresses: Vec<String>,
    /// Account whose funds are spent when no funding accounts are given
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub funding_account_ids: Vec<String>,
}

/// Pay `amount` to every address in the request
///
/// Addresses are checked before any funds are looked at.
pub async fn send(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    request: SendRequest,
) -> Result<LedgerTransaction, WalletError> {
    let network = wallet.config().network;
    for address in &request.addresses {
        parse_address(address, network)?;
    }
    if request.addresses.is_empty() {
        return Err(WalletError::Validation("no destination address given".into()));
    }
    if request.amount == 0 {
        return Err(WalletError::Validation("amount must be positive".into()));
    }
    let total = u64::try_from(request.addresses.len())
        .ok()
        .and_then(|count| request.amount.checked_mul(count))
        .ok_or_else(|| {
            WalletError::Validation(format!(
                "{} dewies to each of {} addresses overflows",
                request.amount,
                request.addresses.len()
            ))
        })?;

    let funding = wallet.funding_accounts(&request.funding_account_ids, request.account_id.as_deref())?;
    log::info!(
        "Sending {} dewies ({} each) to {} address(es) from {} account(s)",
        total,
        request.amount,
        request.addresses.len(),
        funding.len()
    );

    let outputs = request
        .addresses
        .iter()
        .map(|address| PlannedOutput::payment(address.clone(), request.amount))
        .collect();

    fund_and_broadcast(wallet, ledger, &funding, outputs, Reservations::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::ledger::MemoryLedger;
    use crate::wallet::{AccountSettings, Branch};

    #[tokio::test]
    async fn test_invalid_address_rejected_before_funding() {
        let ledger = MemoryLedger::new();
        let wallet = Wallet::new("empty", WalletConfig::default());
        let request = SendRequest {
            amount: 1,
            addresses: vec!["not-an-address".into()],
            account_id: None,
            funding_account_ids: Vec::new(),
        };
        let result = send(&wallet, &ledger, request).await;
        assert!(matches!(result, Err(WalletError::InvalidAddress(a)) if a == "not-an-address"));
    }

    #[tokio::test]
    async fn test_offline_ledger_leaves_addresses_untouched() {
        let ledger = MemoryLedger::new();
        let mut wallet = Wallet::new("main", WalletConfig::default());
        let account = wallet.create_account("main", &AccountSettings::default()).unwrap();
        let funded = account
            .address_generator()
            .get_or_create_usable_address(Branch::Receiving)
            .unwrap();
        let tx = ledger.fund(&funded, 100_000_000).unwrap();
        wallet.apply_transaction(&tx).await.unwrap();

        let before = account.address_generator().addresses_for(Branch::Change);
        let destination = account
            .address_generator()
            .get_or_create_usable_address(Branch::Receiving)
            .unwrap();

        ledger.set_online(false);
        let request = SendRequest {
            amount: 1_000_000,
            addresses: vec![destination],
            account_id: None,
            funding_account_ids: Vec::new(),
        };
        assert!(send(&wallet, &ledger, request).await.is_err());
        assert_eq!(account.address_generator().addresses_for(Branch::Change), before);
    }
}

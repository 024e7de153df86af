//! Building and broadcasting wallet transactions
//!
//! - `builder`: coin selection, fee estimation, assembly
//! - `send`: plain payments
//! - `claims`: channels, streams and supports
//! - `confirm`: waiting for a transaction to be mined

pub mod builder;
pub mod claims;
pub mod confirm;
pub mod send;

use std::sync::Arc;

use crate::error::WalletError;
use crate::ledger::{Ledger, LedgerTransaction};
use crate::wallet::{Account, Branch, Wallet};
use builder::{PlannedOutput, TransactionBuilder};

pub use builder::{CoinSelection, DUST_LIMIT};
pub use claims::{create_channel, create_stream, create_support, ClaimRequest, ClaimResult, SupportRequest};
pub use confirm::wait_for_confirmation;
pub use send::{send, SendRequest};

/// Addresses handed out for a transaction that is not on chain yet
#[derive(Default)]
pub(crate) struct Reservations {
    held: Vec<(Arc<Account>, String)>,
}

impl Reservations {
    pub(crate) fn reserve(&mut self, account: &Arc<Account>, branch: Branch) -> Result<String, WalletError> {
        let address = account.address_generator().next_unused_address(branch)?;
        self.held.push((account.clone(), address.clone()));
        Ok(address)
    }

    pub(crate) fn release_all(self) {
        for (account, address) in self.held {
            account.address_generator().release(&address);
        }
    }
}

/// Fund `outputs` from `funding`, broadcast, and apply the result to the wallet
///
/// Change goes to the first funding account. If building or broadcasting
/// fails the reserved addresses are released and no wallet state changes.
/// Once broadcast the transaction is returned even if applying it locally
/// fails; its addresses stay reserved until a sync records them.
pub(crate) async fn fund_and_broadcast(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    funding: &[Arc<Account>],
    outputs: Vec<PlannedOutput>,
    mut reservations: Reservations,
) -> Result<LedgerTransaction, WalletError> {
    match build_and_broadcast(wallet, ledger, funding, outputs, &mut reservations).await {
        Ok(tx) => {
            if let Err(e) = wallet.apply_transaction(&tx).await {
                log::warn!("Broadcast {} but could not apply it locally: {}", tx.txid, e);
            }
            Ok(tx)
        }
        Err(e) => {
            log::warn!("Transaction not sent: {}", e);
            reservations.release_all();
            Err(e)
        }
    }
}

async fn build_and_broadcast(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    funding: &[Arc<Account>],
    outputs: Vec<PlannedOutput>,
    reservations: &mut Reservations,
) -> Result<LedgerTransaction, WalletError> {
    let change_account = funding
        .first()
        .ok_or_else(|| WalletError::Validation("no funding account".into()))?;
    if let Some(watch_only) = funding.iter().find(|a| a.is_watch_only()) {
        return Err(WalletError::Validation(format!(
            "account {} is watch-only and cannot fund transactions",
            watch_only.id()
        )));
    }

    let addresses: Vec<String> = funding.iter().flat_map(|a| a.addresses()).collect();
    let utxos = ledger.get_utxos(&addresses).await?;

    let builder = TransactionBuilder::new(wallet.config().fee_rate);
    let selection = builder.select_coins(&utxos, &outputs)?;
    let change_address = if selection.change > 0 {
        Some(reservations.reserve(change_account, Branch::Change)?)
    } else {
        None
    };

    let tx = builder.build(&selection, outputs, change_address.as_deref())?;
    let txid = ledger.broadcast(&tx).await?;
    log::info!(
        "Broadcast {} spending {} input(s), fee {} dewies",
        txid,
        tx.inputs.len(),
        tx.fee
    );
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::ledger::{MemoryLedger, OutputKind};
    use crate::wallet::AccountSettings;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::PublicKey;

    #[tokio::test]
    async fn test_broadcast_survives_local_apply_failure() {
        let ledger = MemoryLedger::new();
        let config = WalletConfig {
            max_channel_key_index: 0,
            ..WalletConfig::default()
        };
        let mut wallet = Wallet::new("main", config);
        let account = wallet.create_account("main", &AccountSettings::default()).unwrap();
        let funded = account
            .address_generator()
            .get_or_create_usable_address(Branch::Receiving)
            .unwrap();
        let funding_tx = ledger.fund(&funded, 100_000_000).unwrap();
        wallet.apply_transaction(&funding_tx).await.unwrap();

        // the only channel key is spent, so observing another channel fails
        account.channel_keys().restore(1).await;
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let foreign = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret));

        let mut reservations = Reservations::default();
        let address = reservations.reserve(&account, Branch::Receiving).unwrap();
        let output = PlannedOutput {
            address,
            amount: 1_000_000,
            kind: OutputKind::Claim {
                name: "@foreign".into(),
                channel_public_key_hash: Some(foreign.pubkey_hash()),
                signing_channel_id: None,
            },
        };

        let tx = fund_and_broadcast(&wallet, &ledger, &[account.clone()], vec![output], reservations)
            .await
            .unwrap();
        assert!(ledger.get_transaction(&tx.txid).is_some());
        assert_eq!(account.channel_keys().last_known().await, 1);
    }
}

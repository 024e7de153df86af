use std::time::Duration;

use crate::error::WalletError;
use crate::ledger::{Ledger, LedgerTransaction};

/// Poll the ledger until `tx` is mined, returning its height
///
/// Unavailable errors are logged and polling continues. Dropping the
/// future (or wrapping it in `tokio::time::timeout`) stops the wait and
/// leaves nothing behind.
pub async fn wait_for_confirmation(
    ledger: &dyn Ledger,
    tx: &LedgerTransaction,
    poll_interval: Duration,
) -> Result<u64, WalletError> {
    let addresses: Vec<String> = tx.outputs.iter().map(|o| o.address.clone()).collect();

    loop {
        match ledger.get_transaction_history(&addresses).await {
            Ok(history) => {
                if let Some(height) = history
                    .iter()
                    .find(|candidate| candidate.txid == tx.txid)
                    .and_then(|candidate| candidate.height)
                {
                    log::debug!("Transaction {} confirmed at height {}", tx.txid, height);
                    return Ok(height);
                }
            }
            Err(e) if e.is_retryable() => {
                log::warn!("Waiting for {}: {}", tx.txid, e);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

use crate::error::WalletError;
use crate::ledger::{LedgerTransaction, LedgerUtxo, OutputKind, TxInput, TxOutput};

/// Change below this many dewies is left to the fee
pub const DUST_LIMIT: u64 = 546;

/// An output the caller wants in the transaction
#[derive(Debug, Clone)]
pub struct PlannedOutput {
    pub address: String,
    pub amount: u64,
    pub kind: OutputKind,
}

impl PlannedOutput {
    pub fn payment(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
            kind: OutputKind::Payment,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoinSelection {
    pub inputs: Vec<LedgerUtxo>,
    pub fee: u64,
    pub change: u64,
}

pub struct TransactionBuilder {
    fee_rate: u64,
}

impl TransactionBuilder {
    /// Builder charging `fee_rate` dewies per estimated byte
    pub fn new(fee_rate: u64) -> Self {
        Self { fee_rate }
    }

    /// Estimated size of a P2PKH transaction
    pub fn estimate_tx_size(&self, num_inputs: usize, num_outputs: usize) -> u64 {
        10 + (num_inputs as u64 * 148) + (num_outputs as u64 * 34)
    }

    pub fn estimate_fee(&self, num_inputs: usize, num_outputs: usize) -> u64 {
        self.estimate_tx_size(num_inputs, num_outputs)
            .saturating_mul(self.fee_rate)
    }

    /// First-fit selection over spendable payment outputs, largest first
    ///
    /// The fee assumes a change output; change below the dust limit is
    /// folded into the fee.
    pub fn select_coins(
        &self,
        available: &[LedgerUtxo],
        outputs: &[PlannedOutput],
    ) -> Result<CoinSelection, WalletError> {
        let target = total_amount(outputs)?;

        let mut candidates: Vec<&LedgerUtxo> =
            available.iter().filter(|u| u.kind.is_payment()).collect();
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.outpoint.cmp(&b.outpoint)));

        let mut selected = Vec::new();
        let mut selected_total = 0u64;
        for utxo in candidates {
            selected.push(utxo.clone());
            selected_total = selected_total.saturating_add(utxo.amount);

            let fee = self.estimate_fee(selected.len(), outputs.len() + 1);
            let needed = match target.checked_add(fee) {
                Some(needed) => needed,
                None => break,
            };
            if selected_total >= needed {
                let change = selected_total - needed;
                return Ok(if change < DUST_LIMIT {
                    CoinSelection {
                        inputs: selected,
                        fee: fee + change,
                        change: 0,
                    }
                } else {
                    CoinSelection {
                        inputs: selected,
                        fee,
                        change,
                    }
                });
            }
        }

        let available_total: u64 = available
            .iter()
            .filter(|u| u.kind.is_payment())
            .fold(0u64, |total, u| total.saturating_add(u.amount));
        Err(WalletError::InsufficientFunds(format!(
            "need {} dewies plus fee, only {} available",
            target, available_total
        )))
    }

    /// Assemble the transaction; change, if any, goes last
    pub fn build(
        &self,
        selection: &CoinSelection,
        outputs: Vec<PlannedOutput>,
        change_address: Option<&str>,
    ) -> Result<LedgerTransaction, WalletError> {
        let inputs = selection
            .inputs
            .iter()
            .map(|utxo| TxInput {
                prevout: utxo.outpoint.clone(),
                address: utxo.address.clone(),
                amount: utxo.amount,
            })
            .collect();

        let mut tx_outputs: Vec<TxOutput> = outputs
            .into_iter()
            .enumerate()
            .map(|(vout, output)| TxOutput {
                vout: vout as u32,
                address: output.address,
                amount: output.amount,
                kind: output.kind,
            })
            .collect();

        if selection.change > 0 {
            let address = change_address.ok_or_else(|| {
                WalletError::Internal("change output without a change address".into())
            })?;
            tx_outputs.push(TxOutput {
                vout: tx_outputs.len() as u32,
                address: address.to_string(),
                amount: selection.change,
                kind: OutputKind::Payment,
            });
        }

        LedgerTransaction::new(inputs, tx_outputs, selection.fee)
    }
}

/// Sum of the requested output amounts
pub fn total_amount(outputs: &[PlannedOutput]) -> Result<u64, WalletError> {
    outputs
        .iter()
        .try_fold(0u64, |total, output| total.checked_add(output.amount))
        .ok_or_else(|| WalletError::Validation("total output amount overflows".into()))
}

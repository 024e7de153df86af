//! In-memory ledger
//!
//! A single-process chain with a mempool, block mining, a faucet and
//! address subscriptions. Mirrors what a regtest node behind an indexer
//! offers, so the wallet core can be exercised without a network.

use async_trait::async_trait;
use bitcoin::PubkeyHash;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

use super::types::{claim_id, LedgerTransaction, LedgerUtxo, OutPoint, OutputKind, TxOutput};
use super::Ledger;
use crate::error::WalletError;

pub struct MemoryLedger {
    chain: RwLock<ChainState>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    online: AtomicBool,
}

#[derive(Default)]
struct ChainState {
    /// Accepted transactions in acceptance order
    transactions: Vec<LedgerTransaction>,
    by_txid: HashMap<String, usize>,
    /// Outpoint -> spending txid
    spent: HashMap<OutPoint, String>,
    height: u64,
    next_sequence: u64,
}

impl ChainState {
    fn output(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        let position = self.by_txid.get(&outpoint.txid)?;
        self.transactions[*position]
            .outputs
            .iter()
            .find(|o| o.vout == outpoint.vout)
    }

    fn validate(&self, tx: &LedgerTransaction) -> Result<(), WalletError> {
        if self.by_txid.contains_key(&tx.txid) {
            return Err(WalletError::Conflict(format!("transaction {} already accepted", tx.txid)));
        }
        if tx.outputs.is_empty() {
            return Err(WalletError::Validation("transaction has no outputs".into()));
        }
        for (position, output) in tx.outputs.iter().enumerate() {
            if output.vout as usize != position {
                return Err(WalletError::Validation(format!(
                    "output {} of {} is out of order",
                    output.vout, tx.txid
                )));
            }
        }

        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if !seen.insert(&input.prevout) {
                return Err(WalletError::Conflict(format!("{} spent twice", input.prevout)));
            }
            let prev = self.output(&input.prevout).ok_or_else(|| {
                WalletError::NotFound(format!("unknown outpoint {}", input.prevout))
            })?;
            if let Some(spender) = self.spent.get(&input.prevout) {
                return Err(WalletError::Conflict(format!(
                    "{} already spent by {}",
                    input.prevout, spender
                )));
            }
            if prev.address != input.address || prev.amount != input.amount {
                return Err(WalletError::Validation(format!(
                    "input {} does not match the output it spends",
                    input.prevout
                )));
            }
        }

        if !tx.inputs.is_empty() {
            let total_in: u64 = tx.inputs.iter().map(|i| i.amount).sum();
            let total_out: u64 = tx.outputs.iter().map(|o| o.amount).sum();
            if total_in != total_out + tx.fee {
                return Err(WalletError::Validation(format!(
                    "transaction {} does not balance: in {} out {} fee {}",
                    tx.txid, total_in, total_out, tx.fee
                )));
            }
        }
        Ok(())
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            chain: RwLock::new(ChainState::default()),
            subscribers: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining connectivity
    pub fn set_online(&self, online: bool) {
        log::info!("Memory ledger is now {}", if online { "online" } else { "offline" });
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn height(&self) -> u64 {
        self.chain.read().unwrap_or_else(PoisonError::into_inner).height
    }

    /// Create coins out of thin air, paying `amount` to `address`
    pub fn fund(&self, address: &str, amount: u64) -> Result<LedgerTransaction, WalletError> {
        let tx = LedgerTransaction::new(
            Vec::new(),
            vec![TxOutput {
                vout: 0,
                address: address.to_string(),
                amount,
                kind: OutputKind::Payment,
            }],
            0,
        )?;
        self.accept(tx)
    }

    /// Confirm every mempool transaction, mining `blocks` blocks
    pub fn mine(&self, blocks: u64) -> u64 {
        let mut chain = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        if blocks == 0 {
            return chain.height;
        }
        let first = chain.height + 1;
        chain.height += blocks;
        for tx in chain.transactions.iter_mut().filter(|tx| tx.height.is_none()) {
            tx.height = Some(first);
        }
        log::debug!("Mined {} block(s), height {}", blocks, chain.height);
        chain.height
    }

    pub fn get_transaction(&self, txid: &str) -> Option<LedgerTransaction> {
        let chain = self.chain.read().unwrap_or_else(PoisonError::into_inner);
        chain
            .by_txid
            .get(txid)
            .map(|position| chain.transactions[*position].clone())
    }

    fn ensure_online(&self) -> Result<(), WalletError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WalletError::Unavailable("memory ledger is offline".into()))
        }
    }

    fn accept(&self, mut tx: LedgerTransaction) -> Result<LedgerTransaction, WalletError> {
        {
            let mut chain = self.chain.write().unwrap_or_else(PoisonError::into_inner);
            chain.validate(&tx)?;

            tx.sequence = chain.next_sequence;
            tx.height = None;
            chain.next_sequence += 1;

            for input in &tx.inputs {
                chain.spent.insert(input.prevout.clone(), tx.txid.clone());
            }
            let position = chain.transactions.len();
            chain.by_txid.insert(tx.txid.clone(), position);
            chain.transactions.push(tx.clone());
        }

        log::debug!("Accepted transaction {} (sequence {})", tx.txid, tx.sequence);
        self.notify(&tx);
        Ok(tx)
    }

    fn notify(&self, tx: &LedgerTransaction) {
        let touched: HashSet<&String> = tx
            .inputs
            .iter()
            .map(|i| &i.address)
            .chain(tx.outputs.iter().map(|o| &o.address))
            .collect();

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        for address in touched {
            if let Some(senders) = subscribers.get_mut(address) {
                senders.retain(|sender| sender.send(tx.txid.clone()).is_ok());
            }
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn broadcast(&self, tx: &LedgerTransaction) -> Result<String, WalletError> {
        self.ensure_online()?;
        let accepted = self.accept(tx.clone())?;
        Ok(accepted.txid)
    }

    async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<LedgerUtxo>, WalletError> {
        self.ensure_online()?;
        let wanted: HashSet<&String> = addresses.iter().collect();
        let chain = self.chain.read().unwrap_or_else(PoisonError::into_inner);

        let mut utxos = Vec::new();
        for tx in &chain.transactions {
            for output in tx.outputs.iter().filter(|o| wanted.contains(&o.address)) {
                let outpoint = tx.outpoint(output.vout);
                if chain.spent.contains_key(&outpoint) {
                    continue;
                }
                utxos.push(LedgerUtxo {
                    outpoint,
                    address: output.address.clone(),
                    amount: output.amount,
                    kind: output.kind.clone(),
                    height: tx.height,
                });
            }
        }
        Ok(utxos)
    }

    async fn get_transaction_history(
        &self,
        addresses: &[String],
    ) -> Result<Vec<LedgerTransaction>, WalletError> {
        self.ensure_online()?;
        let wanted: HashSet<String> = addresses.iter().cloned().collect();
        let chain = self.chain.read().unwrap_or_else(PoisonError::into_inner);

        let mut history: Vec<LedgerTransaction> = chain
            .transactions
            .iter()
            .filter(|tx| tx.touches(&wanted))
            .cloned()
            .collect();
        history.sort_by_key(|tx| tx.chronology());
        Ok(history)
    }

    async fn subscribe(&self, address: &str) -> Result<BoxStream<'static, String>, WalletError> {
        self.ensure_online()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_default()
            .push(sender);

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|txid| (txid, receiver))
        })
        .boxed())
    }

    async fn resolve_published_identity(
        &self,
        public_key_hash: &PubkeyHash,
    ) -> Result<Option<String>, WalletError> {
        self.ensure_online()?;
        let chain = self.chain.read().unwrap_or_else(PoisonError::into_inner);

        for tx in &chain.transactions {
            for output in &tx.outputs {
                if let OutputKind::Claim {
                    channel_public_key_hash: Some(hash),
                    ..
                } = &output.kind
                {
                    let outpoint = tx.outpoint(output.vout);
                    if hash == public_key_hash && !chain.spent.contains_key(&outpoint) {
                        return Ok(Some(claim_id(&outpoint)));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TxInput;

    fn spend(prev: &LedgerTransaction, to: &str, amount: u64, fee: u64) -> LedgerTransaction {
        let output = &prev.outputs[0];
        LedgerTransaction::new(
            vec![TxInput {
                prevout: prev.outpoint(0),
                address: output.address.clone(),
                amount: output.amount,
            }],
            vec![TxOutput {
                vout: 0,
                address: to.to_string(),
                amount,
                kind: OutputKind::Payment,
            }],
            fee,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fund_spend_and_mine() {
        let ledger = MemoryLedger::new();
        let funding = ledger.fund("alice", 1_000).unwrap();
        let tx = spend(&funding, "bob", 990, 10);
        ledger.broadcast(&tx).await.unwrap();

        let alice = ledger.get_utxos(&["alice".to_string()]).await.unwrap();
        assert!(alice.is_empty());
        let bob = ledger.get_utxos(&["bob".to_string()]).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].height, None);

        assert_eq!(ledger.mine(1), 1);
        let bob = ledger.get_utxos(&["bob".to_string()]).await.unwrap();
        assert_eq!(bob[0].height, Some(1));
    }

    #[tokio::test]
    async fn test_double_spend_is_conflict() {
        let ledger = MemoryLedger::new();
        let funding = ledger.fund("alice", 1_000).unwrap();
        ledger.broadcast(&spend(&funding, "bob", 990, 10)).await.unwrap();
        let result = ledger.broadcast(&spend(&funding, "carol", 990, 10)).await;
        assert!(matches!(result, Err(WalletError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_unbalanced_transaction_rejected() {
        let ledger = MemoryLedger::new();
        let funding = ledger.fund("alice", 1_000).unwrap();
        let result = ledger.broadcast(&spend(&funding, "bob", 995, 10)).await;
        assert!(matches!(result, Err(WalletError::Validation(_))));
    }

    #[tokio::test]
    async fn test_offline_is_unavailable() {
        let ledger = MemoryLedger::new();
        ledger.set_online(false);
        let result = ledger.get_utxos(&["alice".to_string()]).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
    }

    #[tokio::test]
    async fn test_subscription_receives_txids() {
        let ledger = MemoryLedger::new();
        let mut updates = ledger.subscribe("alice").await.unwrap();
        let funding = ledger.fund("alice", 5).unwrap();
        assert_eq!(updates.next().await, Some(funding.txid));
    }
}

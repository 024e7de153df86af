//! Ledger collaborator interface
//!
//! - `Ledger` trait: the narrow surface the wallet core talks to
//! - `MemoryLedger`: deterministic in-process chain for tests and local runs
//! - `HttpLedger`: JSON client for a remote ledger gateway

mod http;
mod memory;
pub mod types;

use async_trait::async_trait;
use bitcoin::PubkeyHash;
use futures::stream::BoxStream;

use crate::error::WalletError;

pub use http::HttpLedger;
pub use memory::MemoryLedger;
pub use types::{
    claim_id, LedgerTransaction, LedgerUtxo, OutPoint, OutputKind, TxInput, TxOutput,
};

/// Blockchain access used by the wallet core
///
/// Every method may suspend on network I/O. Implementations report
/// connectivity failures as `WalletError::Unavailable`.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a transaction, returning its id
    async fn broadcast(&self, tx: &LedgerTransaction) -> Result<String, WalletError>;

    /// Unspent outputs paying to any of `addresses`
    async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<LedgerUtxo>, WalletError>;

    /// Transactions spending from or paying to any of `addresses`, oldest first
    async fn get_transaction_history(
        &self,
        addresses: &[String],
    ) -> Result<Vec<LedgerTransaction>, WalletError>;

    /// Stream of txids touching `address` from now on
    async fn subscribe(&self, address: &str) -> Result<BoxStream<'static, String>, WalletError>;

    /// Claim id of a live channel signed by the key with this hash, if any
    async fn resolve_published_identity(
        &self,
        public_key_hash: &PubkeyHash,
    ) -> Result<Option<String>, WalletError>;
}

//! Claim Wallet: multi-account wallet core for a name-claim ledger
//!
//! Manages accounts with deterministic key hierarchies, hands out receiving
//! and change addresses under gap and reuse policies, derives channel
//! signing keys with a cursor that survives restarts, and aggregates
//! outputs, claims, supports and history across accounts.
//!
//! # Architecture
//!
//! - **Keys**: BIP-39/BIP-32 account hierarchies and pure derivation
//! - **Wallet**: address generators, channel key manager, accounts and registry
//! - **Ledger**: narrow async interface to the chain, with in-memory and HTTP backends
//! - **Transaction**: coin selection, payments, channels, streams, supports
//! - **View**: scope-relative listings with signed balance deltas
//! - **WalletManager**: orchestration facade with optional JSON storage
//!
//! # Example
//!
//! ```ignore
//! use claim_wallet::{MemoryLedger, WalletConfig, WalletManager};
//! use std::sync::Arc;
//!
//! let manager = WalletManager::new(WalletConfig::default(), Arc::new(MemoryLedger::new()))?;
//! manager.account_create("Main", &Default::default()).await?;
//! let address = manager.address_unused(None).await?;
//! let key = manager.generate_channel_key(None).await?;
//! ```

// Public modules
pub mod amount;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod manager;
pub mod storage;
pub mod transaction;
pub mod view;
pub mod wallet;

// Re-exports for convenience
pub use amount::{dewies_to_lbc, lbc_to_dewies, COIN};
pub use config::WalletConfig;
pub use error::{StorageError, WalletError};
pub use keys::{AccountKeys, ChannelKey, KeyManager};
pub use ledger::{HttpLedger, Ledger, LedgerTransaction, MemoryLedger, OutputKind};
pub use manager::{AccountListOptions, WalletManager};
pub use storage::Storage;
pub use transaction::{ClaimRequest, ClaimResult, SendRequest, SupportRequest};
pub use view::{Balance, ClaimRecord, HistoryEntry, ListFilter, Listing, SupportRecord, UtxoRecord};
pub use wallet::{
    Account, AccountDetails, AccountSettings, Branch, BranchConfig, DefaultAccountPolicy,
    DeterministicChannelKeyManager, Wallet,
};

//! Account registry and per-account state
//!
//! - `AddressGenerator`: receiving and change branches with gap limits
//! - `DeterministicChannelKeyManager`: channel signing keys on chain 2
//! - `Account` / `Wallet`: accounts and their ordered registry
//! - `sync`: bring accounts up to date with the ledger

pub mod account;
pub mod address_generator;
pub mod channel_keys;
pub mod registry;
pub mod sync;

pub use account::{Account, AccountDetails};
pub use address_generator::{AddressGenerator, AddressRecord, Branch, BranchConfig};
pub use channel_keys::DeterministicChannelKeyManager;
pub use registry::{AccountSettings, DefaultAccountPolicy, Wallet};
pub use sync::{sync_account, sync_wallet, SyncReport};

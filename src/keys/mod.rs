//! Key material and derivation
//!
//! - Account hierarchies from mnemonics or extended keys
//! - Pure address and channel-key derivation

pub mod derive;
mod hierarchy;

pub use derive::{
    channel_root, derive_address, derive_addresses, derive_channel_key, parse_address,
    public_key_address, ChannelKey, CHANGE_CHAIN, CHANNEL_CHAIN, RECEIVING_CHAIN,
};
pub use hierarchy::{AccountKeys, KeyManager};

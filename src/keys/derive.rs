//! Pure derivation functions
//!
//! Everything here is a function of (key material, chain, index): no state,
//! no I/O. The stateful generators and the channel key manager wrap these.

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, Network, PubkeyHash, PublicKey};
use std::fmt;
use std::str::FromStr;

use crate::error::WalletError;

/// Chain of the account hierarchy handing out receiving addresses
pub const RECEIVING_CHAIN: u32 = 0;
/// Chain of the account hierarchy handing out change addresses
pub const CHANGE_CHAIN: u32 = 1;
/// Chain of the account hierarchy holding channel signing keys
pub const CHANNEL_CHAIN: u32 = 2;

/// Derive a single P2PKH address from the account xpub at `chain/index`
pub fn derive_address(
    xpub: &Xpub,
    chain: u32,
    index: u32,
    network: Network,
) -> Result<Address, WalletError> {
    let secp = Secp256k1::verification_only();

    let chain_child = ChildNumber::from_normal_idx(chain)?;
    let child_number = ChildNumber::from_normal_idx(index)?;

    let derived_key = xpub.derive_pub(&secp, &[chain_child, child_number])?;

    Ok(public_key_address(&PublicKey::new(derived_key.public_key), network))
}

/// Derive `count` consecutive addresses, returning (index, address) pairs
pub fn derive_addresses(
    xpub: &Xpub,
    chain: u32,
    start: u32,
    count: u32,
    network: Network,
) -> Result<Vec<(u32, Address)>, WalletError> {
    let mut addresses = Vec::with_capacity(count as usize);

    for i in 0..count {
        let index = start
            .checked_add(i)
            .ok_or_else(|| WalletError::Bitcoin("address index overflow".into()))?;
        addresses.push((index, derive_address(xpub, chain, index, network)?));
    }

    Ok(addresses)
}

/// P2PKH address of a public key (a channel's public key id)
pub fn public_key_address(public_key: &PublicKey, network: Network) -> Address {
    Address::p2pkh(public_key.pubkey_hash(), network)
}

/// Parse and network-check an address, echoing the input on failure
pub fn parse_address(address: &str, network: Network) -> Result<Address, WalletError> {
    Address::from_str(address)
        .and_then(|a| a.require_network(network))
        .map_err(|e| {
            log::debug!("Rejected address {}: {}", address, e);
            WalletError::InvalidAddress(address.to_string())
        })
}

/// Root of the channel key chain under an account private key
pub fn channel_root(account_xprv: &Xpriv) -> Result<Xpriv, WalletError> {
    let secp = Secp256k1::new();
    let chain = ChildNumber::from_normal_idx(CHANNEL_CHAIN)?;
    Ok(account_xprv.derive_priv(&secp, &[chain])?)
}

/// Derive the channel signing keypair at child `index` of the channel root
pub fn derive_channel_key(channel_root: &Xpriv, index: u32) -> Result<ChannelKey, WalletError> {
    let secp = Secp256k1::new();
    let child = ChildNumber::from_normal_idx(index)
        .map_err(|_| WalletError::ExhaustedKeySpace { index })?;

    let derived = channel_root.derive_priv(&secp, &[child])?;
    let secret_key = derived.private_key;
    let public_key = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(
        &secp,
        &secret_key,
    ));

    Ok(ChannelKey {
        index,
        secret_key,
        public_key,
    })
}

/// A deterministic channel signing keypair
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelKey {
    index: u32,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl ChannelKey {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.public_key.pubkey_hash()
    }

    /// Hex of the secret scalar, for comparing keys across instances
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKey")
            .field("index", &self.index)
            .field("public_key", &self.public_key.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::keys::KeyManager;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_addresses_are_deterministic_and_distinct() {
        let keys = KeyManager::from_mnemonic(PHRASE, &WalletConfig::default()).unwrap();
        let first = derive_addresses(&keys.xpub, RECEIVING_CHAIN, 0, 5, Network::Regtest).unwrap();
        let again = derive_addresses(&keys.xpub, RECEIVING_CHAIN, 0, 5, Network::Regtest).unwrap();
        assert_eq!(first, again);

        let change = derive_address(&keys.xpub, CHANGE_CHAIN, 0, Network::Regtest).unwrap();
        assert_ne!(first[0].1, change);
    }

    #[test]
    fn test_channel_keys_differ_per_index() {
        let keys = KeyManager::from_mnemonic(PHRASE, &WalletConfig::default()).unwrap();
        let root = channel_root(keys.xprv.as_ref().unwrap()).unwrap();
        let k0 = derive_channel_key(&root, 0).unwrap();
        let k1 = derive_channel_key(&root, 1).unwrap();
        assert_ne!(k0, k1);
        assert_eq!(k0, derive_channel_key(&root, 0).unwrap());
        assert_eq!(k0.secret_hex().len(), 64);
    }

    #[test]
    fn test_hardened_range_is_exhausted() {
        let keys = KeyManager::from_mnemonic(PHRASE, &WalletConfig::default()).unwrap();
        let root = channel_root(keys.xprv.as_ref().unwrap()).unwrap();
        let result = derive_channel_key(&root, 1 << 31);
        assert!(matches!(result, Err(WalletError::ExhaustedKeySpace { index }) if index == 1 << 31));
    }

    #[test]
    fn test_corrupted_address_is_echoed() {
        let keys = KeyManager::from_mnemonic(PHRASE, &WalletConfig::default()).unwrap();
        let good = derive_address(&keys.xpub, RECEIVING_CHAIN, 0, Network::Regtest)
            .unwrap()
            .to_string();
        assert!(parse_address(&good, Network::Regtest).is_ok());

        let bad = format!("{}9999999{}", &good[..20], &good[27..]);
        match parse_address(&bad, Network::Regtest) {
            Err(WalletError::InvalidAddress(echoed)) => assert_eq!(echoed, bad),
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }
}

use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::key::rand;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Network, NetworkKind, PublicKey};
use std::fmt;
use std::str::FromStr;

use crate::config::WalletConfig;
use crate::error::WalletError;

pub struct KeyManager;

impl KeyManager {
    /// Generate a new random account hierarchy with a fresh mnemonic
    pub fn generate(config: &WalletConfig) -> Result<AccountKeys, WalletError> {
        let entropy = rand::random::<[u8; 16]>();

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

        Self::derive_keys(mnemonic, config)
    }

    /// Rebuild an account hierarchy from an existing mnemonic phrase
    pub fn from_mnemonic(words: &str, config: &WalletConfig) -> Result<AccountKeys, WalletError> {
        let mnemonic = Mnemonic::parse(words.trim())
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

        Self::derive_keys(mnemonic, config)
    }

    /// Import an account-level extended key
    ///
    /// An xprv/tprv gives a spendable account without a seed; an xpub/tpub
    /// gives a watch-only account.
    pub fn from_extended_key(key: &str, config: &WalletConfig) -> Result<AccountKeys, WalletError> {
        let key = key.trim();
        let expected = NetworkKind::from(config.network);
        let secp = Secp256k1::new();

        if let Ok(xprv) = Xpriv::from_str(key) {
            if xprv.network != expected {
                return Err(WalletError::Validation(format!(
                    "extended private key is for {:?}, wallet is on {}",
                    xprv.network, config.network
                )));
            }
            return Ok(AccountKeys {
                mnemonic: None,
                xprv: Some(xprv),
                xpub: Xpub::from_priv(&secp, &xprv),
                network: config.network,
            });
        }

        let xpub = Xpub::from_str(key)
            .map_err(|e| WalletError::Validation(format!("invalid extended key: {}", e)))?;
        if xpub.network != expected {
            return Err(WalletError::Validation(format!(
                "extended public key is for {:?}, wallet is on {}",
                xpub.network, config.network
            )));
        }
        Ok(AccountKeys {
            mnemonic: None,
            xprv: None,
            xpub,
            network: config.network,
        })
    }

    /// Derive the account-level keys for the configured derivation path
    fn derive_keys(mnemonic: Mnemonic, config: &WalletConfig) -> Result<AccountKeys, WalletError> {
        let secp = Secp256k1::new();
        let seed = mnemonic.to_seed("");

        let master_key = Xpriv::new_master(config.network, &seed)?;

        let derivation_path = DerivationPath::from_str(&config.account_derivation_path())?;
        let account_key = master_key.derive_priv(&secp, &derivation_path)?;
        let xpub = Xpub::from_priv(&secp, &account_key);

        log::debug!(
            "Derived account hierarchy at {} (fingerprint {})",
            config.account_derivation_path(),
            master_key.fingerprint(&secp)
        );

        Ok(AccountKeys {
            mnemonic: Some(mnemonic),
            xprv: Some(account_key),
            xpub,
            network: config.network,
        })
    }
}

/// Key material of one account. Immutable once created.
#[derive(Clone)]
pub struct AccountKeys {
    pub mnemonic: Option<Mnemonic>,
    pub xprv: Option<Xpriv>,
    pub xpub: Xpub,
    pub network: Network,
}

impl AccountKeys {
    /// Account id: the P2PKH address of the account-level public key
    pub fn account_id(&self) -> String {
        let public_key = PublicKey::new(self.xpub.public_key);
        bitcoin::Address::p2pkh(public_key.pubkey_hash(), self.network).to_string()
    }

    pub fn is_watch_only(&self) -> bool {
        self.xprv.is_none()
    }

    pub fn seed_phrase(&self) -> Option<String> {
        self.mnemonic.as_ref().map(|m| m.to_string())
    }
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("xpub", &self.xpub.to_string())
            .field("has_seed", &self.mnemonic.is_some())
            .field("has_private_key", &self.xprv.is_some())
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_same_seed_same_account_id() {
        let config = WalletConfig::default();
        let a = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        let b = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        assert_eq!(a.account_id(), b.account_id());
        assert_eq!(a.xpub, b.xpub);
        assert!(!a.is_watch_only());
    }

    #[test]
    fn test_generated_accounts_differ() {
        let config = WalletConfig::default();
        let a = KeyManager::generate(&config).unwrap();
        let b = KeyManager::generate(&config).unwrap();
        assert_ne!(a.account_id(), b.account_id());
        assert!(a.seed_phrase().is_some());
    }

    #[test]
    fn test_import_xpub_is_watch_only() {
        let config = WalletConfig::default();
        let full = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        let watch = KeyManager::from_extended_key(&full.xpub.to_string(), &config).unwrap();
        assert!(watch.is_watch_only());
        assert_eq!(watch.account_id(), full.account_id());
    }

    #[test]
    fn test_import_xprv_keeps_identity() {
        let config = WalletConfig::default();
        let full = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        let xprv = full.xprv.unwrap().to_string();
        let imported = KeyManager::from_extended_key(&xprv, &config).unwrap();
        assert!(!imported.is_watch_only());
        assert!(imported.seed_phrase().is_none());
        assert_eq!(imported.account_id(), full.account_id());
    }

    #[test]
    fn test_bad_mnemonic_rejected() {
        let config = WalletConfig::default();
        let result = KeyManager::from_mnemonic("not a real seed phrase", &config);
        assert!(matches!(result, Err(WalletError::InvalidMnemonic(_))));
    }
}

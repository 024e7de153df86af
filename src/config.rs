/// Wallet configuration from environment variables or a TOML file
///
/// Controls the network, ledger endpoint, derivation constants and
/// the account-registry policies. Defaults to Regtest for local development.

use crate::error::{StorageError, WalletError};
use crate::wallet::{BranchConfig, DefaultAccountPolicy};
use bitcoin::Network;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Highest non-hardened BIP32 child number.
pub const MAX_NORMAL_INDEX: u32 = (1 << 31) - 1;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Network used for address encoding and key serialization
    pub network: Network,
    /// Base URL of the ledger gateway (used by `HttpLedger`)
    pub ledger_url: String,
    /// Directory holding persisted wallets
    pub wallet_dir: PathBuf,
    /// BIP44 coin type of the account hierarchy
    pub coin_type: u32,
    /// Fee rate in dewies per byte
    pub fee_rate: u64,
    /// Consecutive unpublished channel keys probed before priming stops
    pub channel_key_scan_gap: u32,
    /// Highest channel key child number that may be derived
    pub max_channel_key_index: u32,
    /// Which account becomes default after the default is removed
    pub default_account_policy: DefaultAccountPolicy,
    /// Refuse to remove the last remaining account
    pub require_account: bool,
    /// Generator settings applied to new accounts
    pub receiving: BranchConfig,
    pub change: BranchConfig,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (a `.env` file is honoured):
    /// - `LBC_NETWORK`: "regtest" (default), "testnet", "signet" or "mainnet"
    /// - `LEDGER_URL`: ledger gateway endpoint
    /// - `WALLET_DIR`: storage directory (default `./wallets`)
    /// - `COIN_TYPE`, `FEE_RATE`, `CHANNEL_KEY_SCAN_GAP`, `MAX_CHANNEL_KEY_INDEX`
    /// - `DEFAULT_ACCOUNT_POLICY`: "first" (default) or "none"
    /// - `REQUIRE_ACCOUNT`: "true" to forbid removing the last account
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let network = match env::var("LBC_NETWORK") {
            Ok(value) => parse_network(&value).unwrap_or_else(|| {
                log::warn!("Unknown network '{}', defaulting to regtest", value);
                Network::Regtest
            }),
            Err(_) => defaults.network,
        };
        log::info!("🔧 Using {} network", network);

        let ledger_url = env::var("LEDGER_URL").unwrap_or(defaults.ledger_url);
        log::info!("📡 Ledger URL: {}", ledger_url);

        let wallet_dir = env::var("WALLET_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.wallet_dir);

        let default_account_policy = match env::var("DEFAULT_ACCOUNT_POLICY") {
            Ok(value) => parse_policy(&value).unwrap_or_else(|| {
                log::warn!("Unknown default account policy '{}', using first remaining", value);
                DefaultAccountPolicy::FirstRemaining
            }),
            Err(_) => defaults.default_account_policy,
        };

        Self {
            network,
            ledger_url,
            wallet_dir,
            coin_type: env_number("COIN_TYPE", defaults.coin_type),
            fee_rate: env_number("FEE_RATE", defaults.fee_rate),
            channel_key_scan_gap: env_number("CHANNEL_KEY_SCAN_GAP", defaults.channel_key_scan_gap)
                .max(1),
            max_channel_key_index: env_number("MAX_CHANNEL_KEY_INDEX", defaults.max_channel_key_index)
                .min(MAX_NORMAL_INDEX),
            default_account_policy,
            require_account: env::var("REQUIRE_ACCOUNT")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.require_account),
            receiving: defaults.receiving,
            change: defaults.change,
        }
    }

    /// Load configuration from a TOML file; absent keys keep their defaults
    ///
    /// ```toml
    /// network = "testnet"
    /// fee_rate = 50
    /// default_account_policy = "none"
    ///
    /// [receiving]
    /// gap = 20
    /// maximum_uses_per_address = 1
    /// ```
    pub fn from_toml_file(path: &Path) -> Result<Self, WalletError> {
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(StorageError::from)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, WalletError> {
        let file: FileConfig = toml::from_str(contents).map_err(StorageError::from)?;
        let defaults = Self::default();

        let network = match file.network {
            Some(value) => parse_network(&value)
                .ok_or_else(|| WalletError::Validation(format!("unknown network '{}'", value)))?,
            None => defaults.network,
        };

        let config = Self {
            network,
            ledger_url: file.ledger_url.unwrap_or(defaults.ledger_url),
            wallet_dir: file.wallet_dir.unwrap_or(defaults.wallet_dir),
            coin_type: file.coin_type.unwrap_or(defaults.coin_type),
            fee_rate: file.fee_rate.unwrap_or(defaults.fee_rate),
            channel_key_scan_gap: file
                .channel_key_scan_gap
                .unwrap_or(defaults.channel_key_scan_gap),
            max_channel_key_index: file
                .max_channel_key_index
                .unwrap_or(defaults.max_channel_key_index),
            default_account_policy: file
                .default_account_policy
                .unwrap_or(defaults.default_account_policy),
            require_account: file.require_account.unwrap_or(defaults.require_account),
            receiving: file.receiving.unwrap_or(defaults.receiving),
            change: file.change.unwrap_or(defaults.change),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the generators and key manager cannot honour
    pub fn validate(&self) -> Result<(), WalletError> {
        self.receiving.validate()?;
        self.change.validate()?;
        if self.channel_key_scan_gap == 0 {
            return Err(WalletError::Validation(
                "channel_key_scan_gap must be at least 1".into(),
            ));
        }
        if self.max_channel_key_index > MAX_NORMAL_INDEX {
            return Err(WalletError::Validation(format!(
                "max_channel_key_index {} exceeds {}",
                self.max_channel_key_index, MAX_NORMAL_INDEX
            )));
        }
        Ok(())
    }

    /// Get the account derivation path for this configuration
    ///
    /// Returns: "m/44'/440'/0'" with the default coin type
    pub fn account_derivation_path(&self) -> String {
        format!("m/44'/{}'/0'", self.coin_type)
    }
}

impl Default for WalletConfig {
    /// Default configuration (Regtest)
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            ledger_url: "http://localhost:50001".to_string(),
            wallet_dir: PathBuf::from("./wallets"),
            coin_type: 440,
            fee_rate: 50,
            channel_key_scan_gap: 5,
            max_channel_key_index: MAX_NORMAL_INDEX,
            default_account_policy: DefaultAccountPolicy::FirstRemaining,
            require_account: false,
            receiving: BranchConfig::receiving_default(),
            change: BranchConfig::change_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    network: Option<String>,
    ledger_url: Option<String>,
    wallet_dir: Option<PathBuf>,
    coin_type: Option<u32>,
    fee_rate: Option<u64>,
    channel_key_scan_gap: Option<u32>,
    max_channel_key_index: Option<u32>,
    default_account_policy: Option<DefaultAccountPolicy>,
    require_account: Option<bool>,
    receiving: Option<BranchConfig>,
    change: Option<BranchConfig>,
}

fn parse_network(value: &str) -> Option<Network> {
    match value.to_lowercase().as_str() {
        "mainnet" | "bitcoin" => Some(Network::Bitcoin),
        "testnet" => Some(Network::Testnet),
        "signet" => Some(Network::Signet),
        "regtest" | "" => Some(Network::Regtest),
        _ => None,
    }
}

fn parse_policy(value: &str) -> Option<DefaultAccountPolicy> {
    match value.to_lowercase().as_str() {
        "first" | "first_remaining" => Some(DefaultAccountPolicy::FirstRemaining),
        "none" => Some(DefaultAccountPolicy::None),
        _ => None,
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

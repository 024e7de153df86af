use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel key space exhausted at index {index}")]
    ExhaustedKeySpace { index: u32 },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Ledger I/O failures are the only errors worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Unavailable(_))
    }
}

impl From<bitcoin::bip32::Error> for WalletError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        WalletError::Bitcoin(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Wallet directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

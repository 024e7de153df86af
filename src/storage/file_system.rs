use std::fs;
use std::path::PathBuf;

use super::models::{AccountRecord, Metadata};
use crate::error::StorageError;

#[derive(Clone)]
pub struct Storage {
    base_path: PathBuf,
}

impl Storage {
    /// Create a new storage instance with the default base directory ("./wallets")
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from("./wallets"),
        }
    }

    /// Create storage with custom base directory (for testing)
    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the base directory path for wallet storage
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    fn wallet_dir(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn accounts_dir(&self, name: &str) -> PathBuf {
        self.wallet_dir(name).join("accounts")
    }

    fn account_path(&self, name: &str, account_id: &str) -> PathBuf {
        self.accounts_dir(name).join(format!("{}.json", account_id))
    }

    /// Create the wallet directory structure
    pub fn create_wallet(&self, name: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.accounts_dir(name))?;
        Ok(())
    }

    pub fn wallet_exists(&self, name: &str) -> bool {
        self.wallet_dir(name).join("metadata.json").exists()
    }

    pub fn save_metadata(&self, name: &str, meta: &Metadata) -> Result<(), StorageError> {
        let path = self.wallet_dir(name).join("metadata.json");
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_metadata(&self, name: &str) -> Result<Metadata, StorageError> {
        let path = self.wallet_dir(name).join("metadata.json");
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let meta = serde_json::from_str(&contents)?;
        Ok(meta)
    }

    pub fn save_account(&self, name: &str, record: &AccountRecord) -> Result<(), StorageError> {
        let path = self.account_path(name, &record.id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_account(&self, name: &str, account_id: &str) -> Result<AccountRecord, StorageError> {
        let path = self.account_path(name, account_id);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let record = serde_json::from_str(&contents)?;
        Ok(record)
    }

    pub fn delete_account(&self, name: &str, account_id: &str) -> Result<(), StorageError> {
        let path = self.account_path(name, account_id);
        if path.exists() {
            log::debug!("Deleting account file: {:?}", path);
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Ids of every account file stored for the wallet
    pub fn list_accounts(&self, name: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.accounts_dir(name);
        if !dir.exists() {
            return Err(StorageError::DirectoryNotFound(dir.display().to_string()));
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// List all wallet names in the storage directory
    pub fn list_wallets(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut wallets = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    wallets.push(name.to_string());
                }
            }
        }
        wallets.sort();
        Ok(wallets)
    }

    /// Delete a wallet and all its associated data from disk
    pub fn delete_wallet(&self, name: &str) -> Result<(), StorageError> {
        let wallet_dir = self.wallet_dir(name);

        if !wallet_dir.exists() {
            return Err(StorageError::FileNotFound(wallet_dir.display().to_string()));
        }

        log::warn!("Deleting wallet directory: {:?}", wallet_dir);
        fs::remove_dir_all(&wallet_dir)?;
        log::info!("Wallet '{}' deleted successfully", name);

        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::BranchConfig;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(id: &str) -> AccountRecord {
        AccountRecord {
            id: id.to_string(),
            name: "main".into(),
            seed: None,
            private_key: None,
            public_key: "tpub".into(),
            receiving: BranchConfig::receiving_default(),
            change: BranchConfig { gap: 97, maximum_uses_per_address: 98 },
            channel_keys_last_known: 3,
            created_at: Utc::now(),
            modified_on: Utc::now(),
        }
    }

    #[test]
    fn test_account_round_trip_and_listing() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(temp.path().to_path_buf());
        storage.create_wallet("w").unwrap();

        storage.save_account("w", &record("b")).unwrap();
        storage.save_account("w", &record("a")).unwrap();
        assert_eq!(storage.list_accounts("w").unwrap(), vec!["a", "b"]);

        let loaded = storage.load_account("w", "b").unwrap();
        assert_eq!(loaded.change.gap, 97);
        assert_eq!(loaded.channel_keys_last_known, 3);

        storage.delete_account("w", "a").unwrap();
        assert_eq!(storage.list_accounts("w").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_missing_metadata() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(temp.path().to_path_buf());
        assert!(!storage.wallet_exists("nope"));
        assert!(matches!(
            storage.load_metadata("nope"),
            Err(StorageError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_delete_wallet() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new_with_base_dir(temp.path().to_path_buf());
        storage.create_wallet("gone").unwrap();
        assert_eq!(storage.list_wallets().unwrap(), vec!["gone"]);
        storage.delete_wallet("gone").unwrap();
        assert!(storage.list_wallets().unwrap().is_empty());
    }
}

//! Data models for wallet storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wallet::BranchConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub network: String,
    /// Account ids in display order
    pub account_order: Vec<String>,
    pub default_account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub seed: Option<String>,
    pub private_key: Option<String>,
    pub public_key: String,
    pub receiving: BranchConfig,
    pub change: BranchConfig,
    #[serde(default)]
    pub channel_keys_last_known: u32,
    pub created_at: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

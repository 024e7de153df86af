//! Ledger data shapes
//!
//! Transactions are carried as effect records: which outpoints they spend
//! and which outputs (payments, claims, supports) they create. Scripts and
//! signatures stay with the ledger collaborator.

use bitcoin::hashes::{hash160, sha256d, Hash};
use bitcoin::key::rand;
use bitcoin::PubkeyHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::WalletError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// What an output carries besides its amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputKind {
    Payment,
    /// A name claim. Channels (published identities) carry the hash of
    /// their signing public key; streams may name the channel signing them.
    Claim {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_public_key_hash: Option<PubkeyHash>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signing_channel_id: Option<String>,
    },
    Support {
        claim_id: String,
        claim_name: String,
    },
}

impl OutputKind {
    pub fn is_payment(&self) -> bool {
        matches!(self, OutputKind::Payment)
    }

    pub fn is_claim(&self) -> bool {
        matches!(self, OutputKind::Claim { .. })
    }

    pub fn is_channel(&self) -> bool {
        matches!(
            self,
            OutputKind::Claim {
                channel_public_key_hash: Some(_),
                ..
            }
        )
    }

    pub fn is_support(&self) -> bool {
        matches!(self, OutputKind::Support { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub vout: u32,
    pub address: String,
    pub amount: u64,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    /// Block height once confirmed
    pub height: Option<u64>,
    /// Position in the ledger's acceptance order, assigned on broadcast
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Assemble an unbroadcast transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, fee: u64) -> Result<Self, WalletError> {
        let timestamp = Utc::now();
        let nonce = rand::random::<u64>();
        let body = serde_json::to_vec(&(&inputs, &outputs, fee, nonce, timestamp))
            .map_err(|e| WalletError::Internal(format!("transaction encoding failed: {}", e)))?;

        Ok(Self {
            txid: sha256d::Hash::hash(&body).to_string(),
            inputs,
            outputs,
            fee,
            height: None,
            sequence: 0,
            timestamp,
        })
    }

    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid.clone(), vout)
    }

    pub fn is_confirmed(&self) -> bool {
        self.height.is_some()
    }

    /// True when any input or output pays from or to one of `addresses`
    pub fn touches(&self, addresses: &HashSet<String>) -> bool {
        self.inputs.iter().any(|i| addresses.contains(&i.address))
            || self.outputs.iter().any(|o| addresses.contains(&o.address))
    }

    /// Sort key, oldest first: confirmed by height, then unconfirmed, each by sequence
    pub fn chronology(&self) -> (u64, u64) {
        (self.height.unwrap_or(u64::MAX), self.sequence)
    }
}

/// Claim id of the claim created at `outpoint`
pub fn claim_id(outpoint: &OutPoint) -> String {
    hash160::Hash::hash(outpoint.to_string().as_bytes()).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerUtxo {
    pub outpoint: OutPoint,
    pub address: String,
    pub amount: u64,
    pub kind: OutputKind,
    pub height: Option<u64>,
}

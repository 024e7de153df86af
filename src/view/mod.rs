//! Cross-account read-only queries
//!
//! Every listing is recomputed from ledger history plus account membership;
//! nothing is stored. Items are newest first: unconfirmed transactions,
//! then confirmed by descending height, each by ledger sequence. Outputs
//! of one transaction keep ascending vout order.

pub mod history;

use bitcoin::{Address, PubkeyHash};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::WalletError;
use crate::ledger::{claim_id, Ledger, LedgerTransaction, OutPoint, OutputKind, TxOutput};
use crate::wallet::Wallet;
pub use history::{history_entry, ClaimInfo, HistoryEntry, Scope, SupportInfo};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub account_id: Option<String>,
    /// Claim name, for claim and support listings
    pub name: Option<String>,
    /// 1-based page number
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl ListFilter {
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Listing<T> {
    fn paginate(items: Vec<T>, filter: &ListFilter) -> Self {
        let total = items.len();
        let items = match filter.page_size {
            Some(page_size) => {
                let page = filter.page.unwrap_or(1).max(1);
                items
                    .into_iter()
                    .skip((page - 1).saturating_mul(page_size))
                    .take(page_size)
                    .collect()
            }
            None => items,
        };
        Self { items, total }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtxoRecord {
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
    pub address: String,
    pub owning_account_id: String,
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub claim_name: String,
    pub claim_id: String,
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
    pub address: String,
    pub owning_account_id: String,
    pub funding_account_ids: Vec<String>,
    pub is_channel: bool,
    pub signing_channel_id: Option<String>,
    /// Address form of the channel's public key
    pub public_key_id: Option<String>,
    pub has_private_key: bool,
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportRecord {
    pub claim_name: String,
    pub claim_id: String,
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
    pub address: String,
    pub owning_account_id: String,
    pub funding_account_ids: Vec<String>,
    /// The supported claim is not held by the queried scope
    pub is_tip: bool,
}

/// Balance of a scope in dewies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub available: u64,
    pub claims: u64,
    pub supports: u64,
    pub total: u64,
}

/// Wallet history, newest first, with what is needed to read it
struct Snapshot {
    owners: HashMap<String, String>,
    history: Vec<LedgerTransaction>,
    spent: HashSet<OutPoint>,
}

impl Snapshot {
    /// Unspent outputs owned by `scope`, newest transaction first
    fn unspent<'s>(
        &'s self,
        scope: &'s Scope<'s>,
    ) -> impl Iterator<Item = (&'s LedgerTransaction, &'s TxOutput, &'s str)> + 's {
        self.history.iter().flat_map(move |tx| {
            tx.outputs.iter().filter_map(move |output| {
                let owner = scope.owner(&output.address)?;
                if self.spent.contains(&tx.outpoint(output.vout)) {
                    return None;
                }
                Some((tx, output, owner))
            })
        })
    }

    /// Ids of every claim paid to an address of `scope`
    fn claims_held(&self, scope: &Scope<'_>) -> HashSet<String> {
        self.history
            .iter()
            .flat_map(|tx| {
                tx.outputs
                    .iter()
                    .filter(|o| o.kind.is_claim() && scope.owns(&o.address))
                    .map(move |o| claim_id(&tx.outpoint(o.vout)))
            })
            .collect()
    }

    fn funding_account_ids(&self, tx: &LedgerTransaction) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for input in &tx.inputs {
            if let Some(owner) = self.owners.get(&input.address) {
                if !ids.contains(owner) {
                    ids.push(owner.clone());
                }
            }
        }
        ids
    }
}

pub struct LedgerView<'a> {
    wallet: &'a Wallet,
    ledger: &'a dyn Ledger,
}

impl<'a> LedgerView<'a> {
    pub fn new(wallet: &'a Wallet, ledger: &'a dyn Ledger) -> Self {
        Self { wallet, ledger }
    }

    fn scope_ids(&self, account_id: Option<&str>) -> Result<HashSet<String>, WalletError> {
        match account_id {
            Some(id) => Ok(HashSet::from([self.wallet.get(id)?.id().to_string()])),
            None => Ok(self
                .wallet
                .accounts()
                .iter()
                .map(|a| a.id().to_string())
                .collect()),
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, WalletError> {
        let owners = self.wallet.address_owners();
        let addresses: Vec<String> = owners.keys().cloned().collect();
        let mut history = if addresses.is_empty() {
            Vec::new()
        } else {
            self.ledger.get_transaction_history(&addresses).await?
        };
        history.sort_by_key(|tx| std::cmp::Reverse(tx.chronology()));

        let spent = history
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|i| i.prevout.clone()))
            .collect();
        Ok(Snapshot {
            owners,
            history,
            spent,
        })
    }

    pub async fn list_utxos(&self, filter: &ListFilter) -> Result<Listing<UtxoRecord>, WalletError> {
        let ids = self.scope_ids(filter.account_id.as_deref())?;
        let snapshot = self.snapshot().await?;
        let scope = Scope::new(&snapshot.owners, ids);

        let items = snapshot
            .unspent(&scope)
            .filter(|(_, output, _)| output.kind.is_payment())
            .map(|(tx, output, owner)| UtxoRecord {
                txid: tx.txid.clone(),
                vout: output.vout,
                amount: output.amount,
                address: output.address.clone(),
                owning_account_id: owner.to_string(),
                height: tx.height,
            })
            .collect();
        Ok(Listing::paginate(items, filter))
    }

    async fn claims_where(
        &self,
        filter: &ListFilter,
        wanted: impl Fn(&OutputKind) -> bool,
    ) -> Result<Listing<ClaimRecord>, WalletError> {
        let ids = self.scope_ids(filter.account_id.as_deref())?;
        let snapshot = self.snapshot().await?;
        let scope = Scope::new(&snapshot.owners, ids);
        let network = self.wallet.config().network;

        let mut items = Vec::new();
        for (tx, output, owner) in snapshot.unspent(&scope) {
            let (name, channel_key, signing_channel_id) = match &output.kind {
                OutputKind::Claim {
                    name,
                    channel_public_key_hash,
                    signing_channel_id,
                } if wanted(&output.kind) => (name, channel_public_key_hash, signing_channel_id),
                _ => continue,
            };
            if filter.name.as_ref().is_some_and(|n| n != name) {
                continue;
            }

            let has_private_key = match channel_key {
                Some(hash) => self.has_channel_key(owner, hash).await,
                None => false,
            };
            items.push(ClaimRecord {
                claim_name: name.clone(),
                claim_id: claim_id(&tx.outpoint(output.vout)),
                txid: tx.txid.clone(),
                vout: output.vout,
                amount: output.amount,
                address: output.address.clone(),
                owning_account_id: owner.to_string(),
                funding_account_ids: snapshot.funding_account_ids(tx),
                is_channel: channel_key.is_some(),
                signing_channel_id: signing_channel_id.clone(),
                public_key_id: channel_key
                    .as_ref()
                    .map(|hash| Address::p2pkh(*hash, network).to_string()),
                has_private_key,
                height: tx.height,
            });
        }
        Ok(Listing::paginate(items, filter))
    }

    async fn has_channel_key(&self, owner: &str, hash: &PubkeyHash) -> bool {
        match self.wallet.get(owner) {
            Ok(account) => account.channel_keys().private_key_for(hash).await.is_some(),
            Err(_) => false,
        }
    }

    pub async fn list_claims(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        self.claims_where(filter, |kind| kind.is_claim()).await
    }

    pub async fn list_channels(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        self.claims_where(filter, |kind| kind.is_channel()).await
    }

    pub async fn list_streams(&self, filter: &ListFilter) -> Result<Listing<ClaimRecord>, WalletError> {
        self.claims_where(filter, |kind| kind.is_claim() && !kind.is_channel())
            .await
    }

    pub async fn list_supports(
        &self,
        filter: &ListFilter,
    ) -> Result<Listing<SupportRecord>, WalletError> {
        let ids = self.scope_ids(filter.account_id.as_deref())?;
        let snapshot = self.snapshot().await?;
        let scope = Scope::new(&snapshot.owners, ids);
        let held = snapshot.claims_held(&scope);
        let scope = scope.with_claims(held);

        let items = snapshot
            .unspent(&scope)
            .filter_map(|(tx, output, owner)| match &output.kind {
                OutputKind::Support {
                    claim_id,
                    claim_name,
                } if filter.name.as_ref().map_or(true, |n| n == claim_name) => {
                    Some(SupportRecord {
                        claim_name: claim_name.clone(),
                        claim_id: claim_id.clone(),
                        txid: tx.txid.clone(),
                        vout: output.vout,
                        amount: output.amount,
                        address: output.address.clone(),
                        owning_account_id: owner.to_string(),
                        funding_account_ids: snapshot.funding_account_ids(tx),
                        is_tip: !scope.holds_claim(claim_id),
                    })
                }
                _ => None,
            })
            .collect();
        Ok(Listing::paginate(items, filter))
    }

    pub async fn list_history(&self, filter: &ListFilter) -> Result<Listing<HistoryEntry>, WalletError> {
        let ids = self.scope_ids(filter.account_id.as_deref())?;
        let snapshot = self.snapshot().await?;
        let scope = Scope::new(&snapshot.owners, ids);
        let held = snapshot.claims_held(&scope);
        let scope = scope.with_claims(held);

        let items = snapshot
            .history
            .iter()
            .filter_map(|tx| history_entry(tx, &scope))
            .collect();
        Ok(Listing::paginate(items, filter))
    }

    /// Look up a live claim held anywhere in the wallet
    pub async fn find_claim(&self, claim_id: &str) -> Result<Option<ClaimRecord>, WalletError> {
        let claims = self.list_claims(&ListFilter::default()).await?;
        Ok(claims.items.into_iter().find(|c| c.claim_id == claim_id))
    }

    pub async fn balance(&self, account_id: Option<&str>) -> Result<Balance, WalletError> {
        let ids = self.scope_ids(account_id)?;
        let snapshot = self.snapshot().await?;
        let scope = Scope::new(&snapshot.owners, ids);

        let mut balance = Balance::default();
        for (_, output, _) in snapshot.unspent(&scope) {
            match output.kind {
                OutputKind::Payment => balance.available += output.amount,
                OutputKind::Claim { .. } => balance.claims += output.amount,
                OutputKind::Support { .. } => balance.supports += output.amount,
            }
        }
        balance.total = balance.available + balance.claims + balance.supports;
        Ok(balance)
    }
}

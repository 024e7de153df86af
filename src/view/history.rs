//! Scope-relative effects of a single transaction
//!
//! A scope is a set of account ids: one account, or the whole wallet. The
//! same transaction reads differently per scope when funding and receiving
//! accounts differ, so nothing here is cached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::ledger::{claim_id, LedgerTransaction, OutputKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimInfo {
    pub claim_name: String,
    pub claim_id: String,
    pub address: String,
    pub nout: u32,
    pub amount: u64,
    pub balance_delta: i64,
    pub is_channel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportInfo {
    pub claim_name: String,
    pub claim_id: String,
    pub address: String,
    pub nout: u32,
    pub amount: u64,
    pub balance_delta: i64,
    /// The supported claim is not held by the scope
    pub is_tip: bool,
}

/// One transaction as seen from a scope; amounts in dewies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub txid: String,
    pub height: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub value: i64,
    pub fee: i64,
    pub balance_delta: i64,
    pub claim_info: Vec<ClaimInfo>,
    pub support_info: Vec<SupportInfo>,
}

/// Which addresses belong to the queried scope
pub struct Scope<'a> {
    owners: &'a HashMap<String, String>,
    account_ids: HashSet<String>,
    claim_ids: HashSet<String>,
}

impl<'a> Scope<'a> {
    pub fn new(owners: &'a HashMap<String, String>, account_ids: HashSet<String>) -> Self {
        Self {
            owners,
            account_ids,
            claim_ids: HashSet::new(),
        }
    }

    /// Claims held by the scope; supports for anything else are tips
    pub fn with_claims(mut self, claim_ids: HashSet<String>) -> Self {
        self.claim_ids = claim_ids;
        self
    }

    pub fn holds_claim(&self, claim_id: &str) -> bool {
        self.claim_ids.contains(claim_id)
    }

    pub fn owner(&self, address: &str) -> Option<&'a str> {
        self.owners
            .get(address)
            .filter(|id| self.account_ids.contains(id.as_str()))
            .map(|id| id.as_str())
    }

    pub fn owns(&self, address: &str) -> bool {
        self.owner(address).is_some()
    }
}

/// Effects of `tx` on `scope`, or None when the scope is not involved
pub fn history_entry(tx: &LedgerTransaction, scope: &Scope<'_>) -> Option<HistoryEntry> {
    let owned_inputs: i64 = tx
        .inputs
        .iter()
        .filter(|i| scope.owns(&i.address))
        .map(|i| i.amount as i64)
        .sum();
    let funded = tx.inputs.iter().any(|i| scope.owns(&i.address));
    let fully_funded = tx.inputs.iter().all(|i| scope.owns(&i.address));
    let receives = tx.outputs.iter().any(|o| scope.owns(&o.address));
    if !funded && !receives {
        return None;
    }

    let mut payments_out = 0i64;
    let mut all_out = 0i64;
    let mut claim_info = Vec::new();
    let mut support_info = Vec::new();

    for output in tx.outputs.iter().filter(|o| scope.owns(&o.address)) {
        let amount = output.amount as i64;
        all_out += amount;
        let deposit_delta = if funded { -amount } else { 0 };

        match &output.kind {
            OutputKind::Payment => payments_out += amount,
            OutputKind::Claim { name, .. } => claim_info.push(ClaimInfo {
                claim_name: name.clone(),
                claim_id: claim_id(&tx.outpoint(output.vout)),
                address: output.address.clone(),
                nout: output.vout,
                amount: output.amount,
                balance_delta: deposit_delta,
                is_channel: output.kind.is_channel(),
            }),
            OutputKind::Support {
                claim_id,
                claim_name,
            } => support_info.push(SupportInfo {
                claim_name: claim_name.clone(),
                claim_id: claim_id.clone(),
                address: output.address.clone(),
                nout: output.vout,
                amount: output.amount,
                balance_delta: deposit_delta,
                is_tip: !scope.holds_claim(claim_id),
            }),
        }
    }

    let fee = if fully_funded { tx.fee as i64 } else { 0 };
    Some(HistoryEntry {
        txid: tx.txid.clone(),
        height: tx.height,
        timestamp: tx.timestamp,
        value: all_out - owned_inputs + fee,
        fee: -fee,
        balance_delta: payments_out - owned_inputs,
        claim_info,
        support_info,
    })
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::builder::PlannedOutput;
use super::{fund_and_broadcast, Reservations};
use crate::error::WalletError;
use crate::keys::ChannelKey;
use crate::ledger::{claim_id, Ledger, LedgerTransaction, OutputKind};
use crate::view::LedgerView;
use crate::wallet::{Account, Branch, Wallet};

/// A channel or stream claim
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub name: String,
    /// Deposit in dewies
    pub amount: u64,
    /// Account that will own the claim, default account when omitted
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub funding_account_ids: Vec<String>,
    /// Channel signing a stream
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportRequest {
    pub claim_id: String,
    /// Required when the claim is not held by this wallet
    #[serde(default)]
    pub claim_name: Option<String>,
    pub amount: u64,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub funding_account_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResult {
    pub tx: LedgerTransaction,
    pub claim_id: String,
    pub nout: u32,
}

impl ClaimResult {
    fn new(tx: LedgerTransaction, claim_id: String) -> Self {
        Self { tx, claim_id, nout: 0 }
    }
}

fn check_amount(amount: u64) -> Result<(), WalletError> {
    if amount == 0 {
        return Err(WalletError::Validation("amount must be positive".into()));
    }
    Ok(())
}

fn owner_and_funding(
    wallet: &Wallet,
    account_id: Option<&str>,
    funding_account_ids: &[String],
) -> Result<(Arc<Account>, Vec<Arc<Account>>), WalletError> {
    let owner = wallet.get_or_default(account_id)?.clone();
    let funding = wallet.funding_accounts(funding_account_ids, Some(owner.id()))?;
    Ok((owner, funding))
}

/// Candidate channel key that is not yet published
///
/// The pending key may have been used by another instance sharing the
/// seed; such keys are promoted and the next one is tried.
async fn unused_channel_key(account: &Account, ledger: &dyn Ledger) -> Result<ChannelKey, WalletError> {
    loop {
        let key = account.channel_keys().generate_next_key(ledger).await?;
        let hash = key.pubkey_hash();
        match ledger.resolve_published_identity(&hash).await? {
            None => return Ok(key),
            Some(claim_id) => {
                log::info!("Pending channel key #{} already signs {}", key.index(), claim_id);
                if !account.channel_keys().observe_published_identity(&hash).await? {
                    return Err(WalletError::Conflict(format!(
                        "channel key #{} is published but could not be promoted",
                        key.index()
                    )));
                }
            }
        }
    }
}

pub async fn create_channel(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    request: ClaimRequest,
) -> Result<ClaimResult, WalletError> {
    if !request.name.starts_with('@') || request.name.len() < 2 {
        return Err(WalletError::Validation(format!(
            "channel name '{}' must start with '@'",
            request.name
        )));
    }
    check_amount(request.amount)?;

    let (owner, funding) = owner_and_funding(wallet, request.account_id.as_deref(), &request.funding_account_ids)?;
    // released after the broadcast has promoted the key
    let _publishing = owner.lock_channel_publication().await;
    let key = unused_channel_key(&owner, ledger).await?;

    let mut reservations = Reservations::default();
    let address = reservations.reserve(&owner, Branch::Receiving)?;
    let output = PlannedOutput {
        address,
        amount: request.amount,
        kind: OutputKind::Claim {
            name: request.name.clone(),
            channel_public_key_hash: Some(key.pubkey_hash()),
            signing_channel_id: None,
        },
    };

    let tx = fund_and_broadcast(wallet, ledger, &funding, vec![output], reservations).await?;
    let claim_id = claim_id(&tx.outpoint(0));
    log::info!(
        "Created channel {} ({}) with key #{} in account {}",
        request.name,
        claim_id,
        key.index(),
        owner.id()
    );
    Ok(ClaimResult::new(tx, claim_id))
}

pub async fn create_stream(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    request: ClaimRequest,
) -> Result<ClaimResult, WalletError> {
    if request.name.is_empty() || request.name.starts_with('@') {
        return Err(WalletError::Validation(format!(
            "stream name '{}' must not be empty or start with '@'",
            request.name
        )));
    }
    check_amount(request.amount)?;

    if let Some(channel_id) = &request.channel_id {
        let channel = LedgerView::new(wallet, ledger)
            .find_claim(channel_id)
            .await?
            .filter(|claim| claim.is_channel)
            .ok_or_else(|| WalletError::NotFound(format!("channel {} not found in wallet", channel_id)))?;
        if !channel.has_private_key {
            return Err(WalletError::Validation(format!(
                "no private key available to sign with channel {}",
                channel_id
            )));
        }
    }

    let (owner, funding) = owner_and_funding(wallet, request.account_id.as_deref(), &request.funding_account_ids)?;
    let mut reservations = Reservations::default();
    let address = reservations.reserve(&owner, Branch::Receiving)?;
    let output = PlannedOutput {
        address,
        amount: request.amount,
        kind: OutputKind::Claim {
            name: request.name.clone(),
            channel_public_key_hash: None,
            signing_channel_id: request.channel_id.clone(),
        },
    };

    let tx = fund_and_broadcast(wallet, ledger, &funding, vec![output], reservations).await?;
    let claim_id = claim_id(&tx.outpoint(0));
    log::info!("Created stream {} ({}) in account {}", request.name, claim_id, owner.id());
    Ok(ClaimResult::new(tx, claim_id))
}

/// Support a claim, in this wallet or elsewhere
///
/// Claims held by the wallet are looked up by id. Any other claim must be
/// named by the caller.
pub async fn create_support(
    wallet: &Wallet,
    ledger: &dyn Ledger,
    request: SupportRequest,
) -> Result<ClaimResult, WalletError> {
    check_amount(request.amount)?;
    let (claim_id, claim_name) = match LedgerView::new(wallet, ledger)
        .find_claim(&request.claim_id)
        .await?
    {
        Some(claim) => (claim.claim_id, claim.claim_name),
        None => {
            let name = request.claim_name.clone().ok_or_else(|| {
                WalletError::NotFound(format!("claim {} not found", request.claim_id))
            })?;
            if !is_claim_id(&request.claim_id) || name.is_empty() {
                return Err(WalletError::Validation(format!(
                    "cannot support '{}' ({})",
                    name, request.claim_id
                )));
            }
            (request.claim_id.to_lowercase(), name)
        }
    };

    let (owner, funding) = owner_and_funding(wallet, request.account_id.as_deref(), &request.funding_account_ids)?;
    let mut reservations = Reservations::default();
    let address = reservations.reserve(&owner, Branch::Receiving)?;
    let output = PlannedOutput {
        address,
        amount: request.amount,
        kind: OutputKind::Support {
            claim_id: claim_id.clone(),
            claim_name: claim_name.clone(),
        },
    };

    let tx = fund_and_broadcast(wallet, ledger, &funding, vec![output], reservations).await?;
    log::info!(
        "Supported {} ({}) with {} dewies from account {}",
        claim_name,
        claim_id,
        request.amount,
        owner.id()
    );
    Ok(ClaimResult::new(tx, claim_id))
}

fn is_claim_id(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

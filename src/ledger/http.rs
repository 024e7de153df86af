use async_trait::async_trait;
use bitcoin::PubkeyHash;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

use super::types::{LedgerTransaction, LedgerUtxo};
use super::Ledger;
use crate::error::WalletError;

/// Ledger reached over HTTP/JSON
///
/// Endpoints (relative to `base_url`):
/// - `POST /tx` with a transaction body, answers the txid as text
/// - `POST /utxos` and `POST /history` with `{"addresses": [...]}`
/// - `GET /identity/{pubkey_hash}`, 404 when no live channel uses the key
///
/// Subscriptions are served by polling the address history.
#[derive(Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct AddressQuery<'a> {
    addresses: &'a [String],
}

#[derive(Deserialize)]
struct IdentityResponse {
    claim_id: String,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_addresses<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        addresses: &[String],
    ) -> Result<T, WalletError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&AddressQuery { addresses })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| WalletError::Unavailable(format!("malformed ledger response: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> WalletError {
    WalletError::Unavailable(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WalletError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::BAD_REQUEST => WalletError::Validation(body),
        StatusCode::NOT_FOUND => WalletError::NotFound(body),
        StatusCode::CONFLICT => WalletError::Conflict(body),
        _ => WalletError::Unavailable(format!("ledger answered {}: {}", status, body)),
    })
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn broadcast(&self, tx: &LedgerTransaction) -> Result<String, WalletError> {
        let url = format!("{}/tx", self.base_url);
        log::debug!("Broadcasting {} to {}", tx.txid, url);

        let response = self
            .client
            .post(&url)
            .json(tx)
            .send()
            .await
            .map_err(transport_error)?;

        let txid = check_status(response)
            .await?
            .text()
            .await
            .map_err(transport_error)?;
        Ok(txid.trim().to_string())
    }

    async fn get_utxos(&self, addresses: &[String]) -> Result<Vec<LedgerUtxo>, WalletError> {
        self.post_addresses("utxos", addresses).await
    }

    async fn get_transaction_history(
        &self,
        addresses: &[String],
    ) -> Result<Vec<LedgerTransaction>, WalletError> {
        let mut history: Vec<LedgerTransaction> = self.post_addresses("history", addresses).await?;
        history.sort_by_key(|tx| tx.chronology());
        Ok(history)
    }

    async fn subscribe(&self, address: &str) -> Result<BoxStream<'static, String>, WalletError> {
        let watched = vec![address.to_string()];
        let mut seen: HashSet<String> = self
            .get_transaction_history(&watched)
            .await?
            .into_iter()
            .map(|tx| tx.txid)
            .collect();

        let (sender, receiver) = mpsc::unbounded_channel();
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ledger.poll_interval);
            loop {
                interval.tick().await;
                let history = match ledger.get_transaction_history(&watched).await {
                    Ok(history) => history,
                    Err(e) => {
                        log::warn!("Polling {} failed: {}", watched[0], e);
                        continue;
                    }
                };
                for tx in history {
                    if seen.insert(tx.txid.clone()) && sender.send(tx.txid).is_err() {
                        return;
                    }
                }
                if sender.is_closed() {
                    return;
                }
            }
        });

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|txid| (txid, receiver))
        })
        .boxed())
    }

    async fn resolve_published_identity(
        &self,
        public_key_hash: &PubkeyHash,
    ) -> Result<Option<String>, WalletError> {
        let url = format!("{}/identity/{}", self.base_url, public_key_hash);
        let response = self.client.get(&url).send().await.map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let identity: IdentityResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| WalletError::Unavailable(format!("malformed ledger response: {}", e)))?;
        Ok(Some(identity.claim_id))
    }
}

//! Deterministic channel key manager
//!
//! Channel signing keys are the children of chain 2 under the account key.
//! `last_known` counts the keys confirmed as used on chain, so the next
//! candidate is always child number `last_known`. A candidate handed out by
//! `generate_next_key` stays pending, and is returned again, until the chain
//! shows it in use.

use bitcoin::bip32::Xpriv;
use bitcoin::PubkeyHash;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::error::WalletError;
use crate::keys::{channel_root, derive_channel_key, AccountKeys, ChannelKey};
use crate::ledger::Ledger;

#[derive(Debug, Clone, Default)]
struct ChannelKeyState {
    last_known: u32,
    cache: BTreeMap<u32, ChannelKey>,
    by_hash: HashMap<PubkeyHash, u32>,
    pending: Option<ChannelKey>,
    primed: bool,
}

impl ChannelKeyState {
    fn remember(&mut self, key: ChannelKey) {
        self.by_hash.insert(key.pubkey_hash(), key.index());
        self.cache.insert(key.index(), key);
    }

    /// Mark `key` and everything below it as used
    fn promote(&mut self, key: ChannelKey) {
        self.remember(key);
        self.last_known = self.last_known.max(key.index() + 1);
        if matches!(self.pending, Some(p) if p.index() < self.last_known) {
            self.pending = None;
        }
    }
}

pub struct DeterministicChannelKeyManager {
    account_id: String,
    /// Chain 2 root; `None` for watch-only accounts
    root: Option<Xpriv>,
    scan_gap: u32,
    max_index: u32,
    state: Mutex<ChannelKeyState>,
}

impl DeterministicChannelKeyManager {
    pub fn new(keys: &AccountKeys, scan_gap: u32, max_index: u32) -> Result<Self, WalletError> {
        let root = match &keys.xprv {
            Some(xprv) => Some(channel_root(xprv)?),
            None => None,
        };
        Ok(Self {
            account_id: keys.account_id(),
            root,
            scan_gap: scan_gap.max(1),
            max_index,
            state: Mutex::new(ChannelKeyState::default()),
        })
    }

    /// Pure derivation of the key at `index`
    pub fn derive(&self, index: u32) -> Result<ChannelKey, WalletError> {
        let root = self.root.as_ref().ok_or_else(|| {
            WalletError::Validation(format!(
                "account {} is watch-only and has no channel keys",
                self.account_id
            ))
        })?;
        if index > self.max_index {
            return Err(WalletError::ExhaustedKeySpace { index });
        }
        derive_channel_key(root, index)
    }

    pub async fn last_known(&self) -> u32 {
        self.state.lock().await.last_known
    }

    pub async fn is_primed(&self) -> bool {
        self.state.lock().await.primed
    }

    pub async fn pending(&self) -> Option<ChannelKey> {
        self.state.lock().await.pending
    }

    /// Load a persisted cursor; the cache is rebuilt on the next priming
    pub async fn restore(&self, last_known: u32) {
        let mut state = self.state.lock().await;
        *state = ChannelKeyState {
            last_known,
            ..ChannelKeyState::default()
        };
    }

    /// Forget everything, as a freshly started instance would
    pub async fn reset(&self) {
        *self.state.lock().await = ChannelKeyState::default();
    }

    /// Key that signs the channel with this public key hash, if it is ours and known
    pub async fn private_key_for(&self, public_key_hash: &PubkeyHash) -> Option<ChannelKey> {
        let state = self.state.lock().await;
        if let Some(index) = state.by_hash.get(public_key_hash) {
            return state.cache.get(index).copied();
        }
        state
            .pending
            .filter(|key| key.pubkey_hash() == *public_key_hash)
    }

    /// Next unused channel key
    ///
    /// Returns the pending candidate unchanged when there is one. Otherwise
    /// candidates are checked against the ledger and every one already
    /// published is promoted, until an unused one is found. Concurrent
    /// callers are serialized and observe the same candidate. Nothing is
    /// committed if the ledger fails.
    pub async fn generate_next_key(&self, ledger: &dyn Ledger) -> Result<ChannelKey, WalletError> {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending {
            return Ok(pending);
        }

        let mut work = state.clone();
        if !work.primed {
            self.prime(&mut work, ledger).await?;
            if let Some(pending) = work.pending {
                *state = work;
                return Ok(pending);
            }
        }

        let candidate = loop {
            let candidate = self.derive(work.last_known)?;
            match ledger.resolve_published_identity(&candidate.pubkey_hash()).await? {
                Some(claim_id) => {
                    log::info!(
                        "Channel key #{} of {} already signs {}, skipping",
                        candidate.index(),
                        self.account_id,
                        claim_id
                    );
                    work.promote(candidate);
                }
                None => break candidate,
            }
        };

        work.pending = Some(candidate);
        *state = work;
        log::debug!("Channel key #{} of {} is pending", candidate.index(), self.account_id);
        Ok(candidate)
    }

    /// Advance the cursor when a channel signed by the current candidate appears
    ///
    /// Returns true if the key was promoted. Hashes of keys already known,
    /// or of keys other than the current candidate, are ignored.
    pub async fn observe_published_identity(
        &self,
        public_key_hash: &PubkeyHash,
    ) -> Result<bool, WalletError> {
        if self.root.is_none() {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        if state.by_hash.contains_key(public_key_hash) {
            return Ok(false);
        }

        let candidate = match state.pending {
            Some(pending) => pending,
            None => self.derive(state.last_known)?,
        };
        if candidate.pubkey_hash() != *public_key_hash {
            return Ok(false);
        }

        state.promote(candidate);
        log::info!(
            "Channel key #{} of {} observed on chain, last known is now {}",
            candidate.index(),
            self.account_id,
            state.last_known
        );
        Ok(true)
    }

    /// Rebuild the key cache and catch up with keys published elsewhere
    ///
    /// Derives every key below `last_known`, then probes forward until
    /// `scan_gap` consecutive keys are unpublished. Never lowers
    /// `last_known`. Returns the resulting cursor.
    pub async fn ensure_cache_primed(&self, ledger: &dyn Ledger) -> Result<u32, WalletError> {
        if self.root.is_none() {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        if state.primed {
            return Ok(state.last_known);
        }

        let mut work = state.clone();
        self.prime(&mut work, ledger).await?;
        *state = work;
        Ok(state.last_known)
    }

    async fn prime(&self, work: &mut ChannelKeyState, ledger: &dyn Ledger) -> Result<(), WalletError> {
        for index in 0..work.last_known {
            if !work.cache.contains_key(&index) {
                let key = self.derive(index)?;
                work.remember(key);
            }
        }

        let start = work.last_known;
        let mut index = start;
        let mut misses = 0;
        while misses < self.scan_gap {
            let candidate = match self.derive(index) {
                Ok(candidate) => candidate,
                Err(WalletError::ExhaustedKeySpace { .. }) => break,
                Err(e) => return Err(e),
            };

            match ledger.resolve_published_identity(&candidate.pubkey_hash()).await? {
                Some(_) => {
                    // keys skipped inside the window count as consumed
                    for skipped in work.last_known..index {
                        let key = self.derive(skipped)?;
                        work.remember(key);
                    }
                    work.promote(candidate);
                    misses = 0;
                }
                None => misses += 1,
            }

            index = match index.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        if matches!(work.pending, Some(p) if p.index() != work.last_known) {
            work.pending = None;
        }
        work.primed = true;

        if work.last_known > start {
            log::info!(
                "Primed channel keys of {}: last known moved {} -> {}",
                self.account_id,
                start,
                work.last_known
            );
        } else {
            log::debug!("Primed channel keys of {} at {}", self.account_id, start);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::keys::KeyManager;
    use crate::ledger::{LedgerTransaction, MemoryLedger, OutputKind, TxOutput};
    use std::sync::Arc;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn manager(scan_gap: u32) -> DeterministicChannelKeyManager {
        let keys = KeyManager::from_mnemonic(PHRASE, &WalletConfig::default()).unwrap();
        DeterministicChannelKeyManager::new(&keys, scan_gap, crate::config::MAX_NORMAL_INDEX).unwrap()
    }

    async fn publish(ledger: &MemoryLedger, key: &ChannelKey) {
        let funding = ledger.fund("faucet", 1_000).unwrap();
        let tx = LedgerTransaction::new(
            vec![crate::ledger::TxInput {
                prevout: funding.outpoint(0),
                address: "faucet".into(),
                amount: 1_000,
            }],
            vec![TxOutput {
                vout: 0,
                address: "owner".into(),
                amount: 900,
                kind: OutputKind::Claim {
                    name: format!("@channel{}", key.index()),
                    channel_public_key_hash: Some(key.pubkey_hash()),
                    signing_channel_id: None,
                },
            }],
            100,
        )
        .unwrap();
        ledger.broadcast(&tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_is_idempotent_until_used() {
        let ledger = MemoryLedger::new();
        let keys = manager(5);

        let first = keys.generate_next_key(&ledger).await.unwrap();
        let again = keys.generate_next_key(&ledger).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.index(), 0);
        assert_eq!(keys.last_known().await, 0);

        publish(&ledger, &first).await;
        assert!(keys.observe_published_identity(&first.pubkey_hash()).await.unwrap());
        assert_eq!(keys.last_known().await, 1);

        let next = keys.generate_next_key(&ledger).await.unwrap();
        assert_eq!(next.index(), 1);
        assert_ne!(next, first);
    }

    #[tokio::test]
    async fn test_observe_ignores_other_keys() {
        let keys = manager(5);
        let other = keys.derive(3).unwrap();
        assert!(!keys.observe_published_identity(&other.pubkey_hash()).await.unwrap());
        assert_eq!(keys.last_known().await, 0);
    }

    #[tokio::test]
    async fn test_generate_skips_keys_published_elsewhere() {
        let ledger = MemoryLedger::new();
        let other_instance = manager(5);
        for index in 0..2 {
            publish(&ledger, &other_instance.derive(index).unwrap()).await;
        }

        let keys = manager(5);
        let key = keys.generate_next_key(&ledger).await.unwrap();
        assert_eq!(key.index(), 2);
        assert_eq!(keys.last_known().await, 2);
    }

    #[tokio::test]
    async fn test_priming_crosses_abandoned_gap() {
        let ledger = MemoryLedger::new();
        let keys = manager(3);
        publish(&ledger, &keys.derive(0).unwrap()).await;
        // index 1 handed out but never published
        publish(&ledger, &keys.derive(2).unwrap()).await;

        assert_eq!(keys.ensure_cache_primed(&ledger).await.unwrap(), 3);
        assert!(keys.is_primed().await);
        for index in 0..3 {
            let hash = keys.derive(index).unwrap().pubkey_hash();
            assert!(keys.private_key_for(&hash).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_priming_never_lowers_cursor() {
        let ledger = MemoryLedger::new();
        let keys = manager(2);
        keys.restore(4).await;
        assert_eq!(keys.ensure_cache_primed(&ledger).await.unwrap(), 4);
        let hash = keys.derive(3).unwrap().pubkey_hash();
        assert_eq!(keys.private_key_for(&hash).await.unwrap().index(), 3);
    }

    #[tokio::test]
    async fn test_reset_forgets_cache_until_primed() {
        let ledger = MemoryLedger::new();
        let keys = manager(5);
        let key = keys.generate_next_key(&ledger).await.unwrap();
        publish(&ledger, &key).await;
        keys.observe_published_identity(&key.pubkey_hash()).await.unwrap();

        keys.reset().await;
        assert_eq!(keys.last_known().await, 0);
        assert!(keys.private_key_for(&key.pubkey_hash()).await.is_none());

        keys.ensure_cache_primed(&ledger).await.unwrap();
        assert_eq!(keys.last_known().await, 1);
        assert!(keys.private_key_for(&key.pubkey_hash()).await.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_ledger_leaves_state_untouched() {
        let ledger = MemoryLedger::new();
        let keys = manager(5);
        ledger.set_online(false);

        let result = keys.generate_next_key(&ledger).await;
        assert!(matches!(result, Err(WalletError::Unavailable(_))));
        assert!(keys.pending().await.is_none());
        assert!(!keys.is_primed().await);
    }

    #[tokio::test]
    async fn test_exhausted_key_space() {
        let ledger = MemoryLedger::new();
        let config = WalletConfig::default();
        let account = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        let keys = DeterministicChannelKeyManager::new(&account, 1, 1).unwrap();
        keys.restore(2).await;

        let result = keys.generate_next_key(&ledger).await;
        assert!(matches!(result, Err(WalletError::ExhaustedKeySpace { index: 2 })));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_candidate() {
        let ledger = Arc::new(MemoryLedger::new());
        let keys = Arc::new(manager(5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let keys = keys.clone();
                tokio::spawn(async move { keys.generate_next_key(ledger.as_ref()).await.unwrap() })
            })
            .collect();

        let mut generated = Vec::new();
        for handle in handles {
            generated.push(handle.await.unwrap());
        }
        assert!(generated.iter().all(|key| *key == generated[0]));
    }

    #[tokio::test]
    async fn test_watch_only_has_no_channel_keys() {
        let config = WalletConfig::default();
        let full = KeyManager::from_mnemonic(PHRASE, &config).unwrap();
        let watch = KeyManager::from_extended_key(&full.xpub.to_string(), &config).unwrap();
        let keys = DeterministicChannelKeyManager::new(&watch, 5, 10).unwrap();

        let ledger = MemoryLedger::new();
        let result = keys.generate_next_key(&ledger).await;
        assert!(matches!(result, Err(WalletError::Validation(_))));
    }
}

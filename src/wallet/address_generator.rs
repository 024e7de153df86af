use bitcoin::bip32::Xpub;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::WalletError;
use crate::keys::{derive_address, CHANGE_CHAIN, RECEIVING_CHAIN};

/// Gap and reuse policy of one address branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    pub gap: u32,
    pub maximum_uses_per_address: u32,
}

impl BranchConfig {
    pub fn receiving_default() -> Self {
        Self {
            gap: 20,
            maximum_uses_per_address: 1,
        }
    }

    pub fn change_default() -> Self {
        Self {
            gap: 6,
            maximum_uses_per_address: 1,
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.gap == 0 {
            return Err(WalletError::Validation("address gap must be at least 1".into()));
        }
        if self.maximum_uses_per_address == 0 {
            return Err(WalletError::Validation(
                "maximum uses per address must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Receiving,
    Change,
}

impl Branch {
    pub fn chain(self) -> u32 {
        match self {
            Branch::Receiving => RECEIVING_CHAIN,
            Branch::Change => CHANGE_CHAIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRecord {
    pub branch: Branch,
    pub index: u32,
    pub address: String,
    pub used_times: u32,
    /// Handed out by `next_unused_address` and not yet seen on chain
    pub reserved: u32,
}

impl AddressRecord {
    fn is_usable(&self, config: &BranchConfig) -> bool {
        self.used_times + self.reserved < config.maximum_uses_per_address
    }
}

struct BranchState {
    branch: Branch,
    config: BranchConfig,
    records: Vec<AddressRecord>,
}

impl BranchState {
    fn extend(&mut self, xpub: &Xpub, network: Network, count: u32) -> Result<(), WalletError> {
        for _ in 0..count {
            let index = self.records.len() as u32;
            let address = derive_address(xpub, self.branch.chain(), index, network)?;
            self.records.push(AddressRecord {
                branch: self.branch,
                index,
                address: address.to_string(),
                used_times: 0,
                reserved: 0,
            });
        }
        Ok(())
    }

    /// Keep at least `gap` never-used addresses after the last used one
    fn ensure_gap(&mut self, xpub: &Xpub, network: Network) -> Result<(), WalletError> {
        let tail_start = self
            .records
            .iter()
            .rposition(|r| r.used_times > 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        let unused_tail = (self.records.len() - tail_start) as u32;

        if unused_tail < self.config.gap {
            let missing = self.config.gap - unused_tail;
            log::debug!(
                "Extending {:?} branch by {} address(es) to keep a gap of {}",
                self.branch,
                missing,
                self.config.gap
            );
            self.extend(xpub, network, missing)?;
        }
        Ok(())
    }

    fn first_usable(&self) -> Option<usize> {
        self.records.iter().position(|r| r.is_usable(&self.config))
    }

    fn find(&self, address: &str) -> Option<usize> {
        self.records.iter().position(|r| r.address == address)
    }
}

/// Receiving and change address branches of one account
///
/// Each branch sits behind its own lock so that picking and reserving the
/// next address is a single critical section.
pub struct AddressGenerator {
    xpub: Xpub,
    network: Network,
    receiving: Mutex<BranchState>,
    change: Mutex<BranchState>,
}

impl AddressGenerator {
    pub fn new(
        xpub: Xpub,
        network: Network,
        receiving: BranchConfig,
        change: BranchConfig,
    ) -> Result<Self, WalletError> {
        receiving.validate()?;
        change.validate()?;

        let mut receiving_state = BranchState {
            branch: Branch::Receiving,
            config: receiving,
            records: Vec::new(),
        };
        let mut change_state = BranchState {
            branch: Branch::Change,
            config: change,
            records: Vec::new(),
        };
        receiving_state.ensure_gap(&xpub, network)?;
        change_state.ensure_gap(&xpub, network)?;

        Ok(Self {
            xpub,
            network,
            receiving: Mutex::new(receiving_state),
            change: Mutex::new(change_state),
        })
    }

    fn branch(&self, branch: Branch) -> MutexGuard<'_, BranchState> {
        let lock = match branch {
            Branch::Receiving => &self.receiving,
            Branch::Change => &self.change,
        };
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick the lowest usable address and reserve one use of it
    pub fn next_unused_address(&self, branch: Branch) -> Result<String, WalletError> {
        let mut state = self.branch(branch);
        state.ensure_gap(&self.xpub, self.network)?;

        let position = loop {
            match state.first_usable() {
                Some(position) => break position,
                None => state.extend(&self.xpub, self.network, 1)?,
            }
        };

        let record = &mut state.records[position];
        record.reserved += 1;
        log::debug!("Reserved {:?} address #{} {}", branch, record.index, record.address);
        Ok(record.address.clone())
    }

    /// Lowest usable address, without reserving it
    pub fn get_or_create_usable_address(&self, branch: Branch) -> Result<String, WalletError> {
        let mut state = self.branch(branch);
        state.ensure_gap(&self.xpub, self.network)?;

        loop {
            if let Some(position) = state.first_usable() {
                return Ok(state.records[position].address.clone());
            }
            state.extend(&self.xpub, self.network, 1)?;
        }
    }

    /// Give back a reservation that never made it on chain
    pub fn release(&self, address: &str) -> bool {
        for branch in [Branch::Receiving, Branch::Change] {
            let mut state = self.branch(branch);
            if let Some(position) = state.find(address) {
                let record = &mut state.records[position];
                if record.reserved > 0 {
                    record.reserved -= 1;
                    return true;
                }
                return false;
            }
        }
        false
    }

    /// Record one on-chain use of `address`, consuming a reservation if any
    pub fn mark_used(&self, address: &str) -> Result<Branch, WalletError> {
        for branch in [Branch::Receiving, Branch::Change] {
            let mut state = self.branch(branch);
            if let Some(position) = state.find(address) {
                let record = &mut state.records[position];
                record.used_times += 1;
                record.reserved = record.reserved.saturating_sub(1);
                state.ensure_gap(&self.xpub, self.network)?;
                return Ok(branch);
            }
        }
        Err(WalletError::Validation(format!(
            "address {} does not belong to this account",
            address
        )))
    }

    pub fn contains(&self, address: &str) -> bool {
        [Branch::Receiving, Branch::Change]
            .into_iter()
            .any(|branch| self.branch(branch).find(address).is_some())
    }

    /// All addresses of the account, receiving branch first
    pub fn addresses_for_account(&self) -> Vec<AddressRecord> {
        let mut records = self.addresses_for(Branch::Receiving);
        records.extend(self.addresses_for(Branch::Change));
        records
    }

    pub fn addresses_for(&self, branch: Branch) -> Vec<AddressRecord> {
        self.branch(branch).records.clone()
    }

    pub fn len(&self) -> usize {
        self.branch(Branch::Receiving).records.len() + self.branch(Branch::Change).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self, branch: Branch) -> BranchConfig {
        self.branch(branch).config
    }

    /// Replace a branch policy; applied lazily on the next generation call
    pub fn set_config(&self, branch: Branch, config: BranchConfig) -> Result<(), WalletError> {
        config.validate()?;
        self.branch(branch).config = config;
        Ok(())
    }
}

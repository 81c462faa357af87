//! Hash-time-locked payments between the two channel participants.
//!
//! An HTLC starts `Pending` and ends either `Claimed` (the recipient revealed the preimage of
//! the hash lock) or `Refunded` (the sender took the funds back after the time lock). Both end
//! states are terminal.

use std::collections::BTreeMap;

use channel_crypto::hashes::hash_lock_of;
use serde::{Deserialize, Serialize};
use state_dag::CellId;

use crate::config::ClaimPolicy;
use crate::error::HtlcError;

pub type HtlcId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcState {
    Pending,
    Claimed,
    Refunded,
}

/// Creation parameters. `sender` and `recipient` are participant indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtlcParams {
    pub amount: u64,
    pub hash_lock: Vec<u8>,
    pub time_lock: u64,
    pub sender: usize,
    pub recipient: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Htlc {
    hash_lock: [u8; 32],
    time_lock: u64,
    amount: u64,
    sender: u8,
    recipient: u8,
    state: HtlcState,
}

impl Htlc {
    pub fn new(params: &HtlcParams) -> Result<Self, HtlcError> {
        let hash_lock: [u8; 32] = params
            .hash_lock
            .as_slice()
            .try_into()
            .map_err(|_| HtlcError::InvalidHashLock(params.hash_lock.len()))?;
        if params.amount == 0 {
            return Err(HtlcError::ZeroAmount);
        }
        Ok(Self {
            hash_lock,
            time_lock: params.time_lock,
            amount: params.amount,
            sender: params.sender as u8,
            recipient: params.recipient as u8,
            state: HtlcState::Pending,
        })
    }

    pub fn hash_lock(&self) -> &[u8; 32] {
        &self.hash_lock
    }

    pub fn time_lock(&self) -> u64 {
        self.time_lock
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn sender(&self) -> usize {
        self.sender as usize
    }

    pub fn recipient(&self) -> usize {
        self.recipient as usize
    }

    pub fn state(&self) -> HtlcState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == HtlcState::Pending
    }

    /// Claim with the preimage, without looking at the clock.
    pub fn claim(&mut self, preimage: &[u8]) -> Result<(), HtlcError> {
        if !self.is_pending() {
            return Err(HtlcError::AlreadyResolved);
        }
        if hash_lock_of(preimage) != self.hash_lock {
            return Err(HtlcError::InvalidPreimage);
        }
        self.state = HtlcState::Claimed;
        Ok(())
    }

    /// Claim at time `now` under `policy`.
    pub fn claim_at(&mut self, preimage: &[u8], now: u64, policy: ClaimPolicy) -> Result<(), HtlcError> {
        if !self.is_pending() {
            return Err(HtlcError::AlreadyResolved);
        }
        if policy == ClaimPolicy::ClaimBeforeExpiry && now > self.time_lock {
            return Err(HtlcError::Expired {
                now,
                time_lock: self.time_lock,
            });
        }
        self.claim(preimage)
    }

    pub fn refund(&mut self, now: u64) -> Result<(), HtlcError> {
        if !self.is_pending() {
            return Err(HtlcError::AlreadyResolved);
        }
        if now <= self.time_lock {
            return Err(HtlcError::TimeLockNotExpired {
                now,
                time_lock: self.time_lock,
            });
        }
        self.state = HtlcState::Refunded;
        Ok(())
    }
}

/// Cell payload for an HTLC: its channel-local id plus the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcRecord {
    pub id: HtlcId,
    pub htlc: Htlc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtlcEntry {
    pub htlc: Htlc,
    pub cell: CellId,
}

/// Per-channel HTLC table. Ids are handed out sequentially and never reused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HtlcRegistry {
    entries: BTreeMap<HtlcId, HtlcEntry>,
    next_id: HtlcId,
}

impl HtlcRegistry {
    pub fn next_id(&self) -> HtlcId {
        self.next_id
    }

    pub fn insert(&mut self, id: HtlcId, htlc: Htlc, cell: CellId) {
        self.entries.insert(id, HtlcEntry { htlc, cell });
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    pub fn get(&self, id: HtlcId) -> Option<&HtlcEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: HtlcId) -> Option<&mut HtlcEntry> {
        self.entries.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HtlcId, &HtlcEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = (HtlcId, &HtlcEntry)> {
        self.iter().filter(|(_, entry)| entry.htlc.is_pending())
    }

    /// Sum of amounts still locked in pending HTLCs.
    pub fn locked(&self) -> u128 {
        self.pending()
            .map(|(_, entry)| u128::from(entry.htlc.amount()))
            .sum()
    }

    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.entries.values().map(|entry| entry.cell)
    }
}

use std::fmt;
use std::str::FromStr;

use channel_crypto::hashes::sha256;
use serde::{Deserialize, Serialize};
use state_boc::StateRoot;
use state_dag::{CellId, CellKind, CellStore, StoreLimits};

use crate::codec;
use crate::config::Network;
use crate::error::{ChannelError, ChannelResult};

/// Cell 0 of every channel store. It is a root and carries the [`Ledger`].
pub const LEDGER_CELL: CellId = CellId(0);

pub const PARTICIPANTS: usize = 2;

/// Public identity of one channel party. Both ids are committed in the ledger cell, so two
/// channels with equal deposits but different parties never share a state root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 32]);

impl ParticipantId {
    /// Id derived from a human readable name, for simulations and tests.
    pub fn from_label(label: &str) -> Self {
        let mut bytes = b"channel-participant:".to_vec();
        bytes.extend_from_slice(label.as_bytes());
        Self(sha256(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ParticipantId {
    type Err = ChannelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(value)
            .map_err(|_| ChannelError::InvalidArgument("participant id must be hex"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChannelError::InvalidArgument("participant id must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Balance sheet stored in the ledger cell, so the state root commits to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub network: Network,
    pub participants: [ParticipantId; PARTICIPANTS],
    pub balances: [u64; PARTICIPANTS],
    pub nonce: u64,
    pub locked: u64,
    pub settled: bool,
}

impl Ledger {
    pub fn new(
        network: Network,
        participants: [ParticipantId; PARTICIPANTS],
        balances: [u64; PARTICIPANTS],
    ) -> Self {
        Self {
            network,
            participants,
            balances,
            nonce: 0,
            locked: 0,
            settled: false,
        }
    }

    pub fn encode(&self) -> ChannelResult<Vec<u8>> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> ChannelResult<Self> {
        codec::decode(bytes)
    }

    pub fn read_from(store: &CellStore) -> ChannelResult<Self> {
        let cell = store
            .get(LEDGER_CELL)
            .ok_or(ChannelError::InvalidOperation("store has no ledger cell"))?;
        Self::decode(cell.payload())
    }

    /// Fresh store holding only the ledger cell, marked as root.
    pub fn genesis_store(&self, limits: StoreLimits) -> ChannelResult<CellStore> {
        let mut store = CellStore::new(limits);
        let id = store.add_cell(self.encode()?, CellKind::Ordinary)?;
        if id != LEDGER_CELL {
            return Err(ChannelError::InvalidOperation("ledger cell must be cell 0"));
        }
        store.set_root(id)?;
        Ok(store)
    }

    pub fn debit(&mut self, participant: usize, amount: u64) -> ChannelResult<()> {
        let balance = self.balance_mut(participant)?;
        let available = *balance;
        *balance = available
            .checked_sub(amount)
            .ok_or(ChannelError::InsufficientBalance {
                needed: amount,
                available,
            })?;
        Ok(())
    }

    pub fn credit(&mut self, participant: usize, amount: u64) -> ChannelResult<()> {
        let balance = self.balance_mut(participant)?;
        *balance = balance.checked_add(amount).ok_or(ChannelError::BalanceOverflow)?;
        Ok(())
    }

    fn balance_mut(&mut self, participant: usize) -> ChannelResult<&mut u64> {
        self.balances
            .get_mut(participant)
            .ok_or(ChannelError::InvalidArgument("participant index out of range"))
    }

    pub fn bump_nonce(&mut self) -> ChannelResult<()> {
        self.nonce = self.nonce.checked_add(1).ok_or(ChannelError::NonceOverflow)?;
        Ok(())
    }
}

/// Read-only view of a channel at its last commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub network: Network,
    pub participants: [ParticipantId; PARTICIPANTS],
    pub balances: [u64; PARTICIPANTS],
    pub nonce: u64,
    pub root: StateRoot,
    /// Value held in pending HTLCs.
    pub locked: u64,
    pub settled: bool,
}

impl ChannelState {
    pub fn from_ledger(ledger: &Ledger, root: StateRoot) -> Self {
        Self {
            network: ledger.network,
            participants: ledger.participants,
            balances: ledger.balances,
            nonce: ledger.nonce,
            root,
            locked: ledger.locked,
            settled: ledger.settled,
        }
    }

    /// Balances plus locked value; constant for the life of a channel.
    pub fn total_value(&self) -> u128 {
        self.balances.iter().map(|b| u128::from(*b)).sum::<u128>() + u128::from(self.locked)
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }
}

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use state_dag::{StoreLimits, DEFAULT_MAX_DEPTH};
use transition_proof::SUPPORTED_SECURITY_BITS;

use crate::error::{ChannelError, ChannelResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = ChannelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ChannelError::Config(format!("unknown network {value:?}"))),
        }
    }
}

/// How a claim that arrives after the time lock is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Claim and refund race once the lock has passed; whichever commits first resolves the HTLC.
    #[default]
    FirstResolutionWins,
    /// Claims are refused once `now > time_lock`.
    ClaimBeforeExpiry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub network: Network,
    /// Deposit used for each participant when the caller does not give explicit deposits.
    pub initial_balance: u64,
    pub security_bits: u32,
    pub max_depth: usize,
    pub max_cells: Option<usize>,
    pub proof_timeout_ms: u64,
    pub claim_policy: ClaimPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            initial_balance: 100,
            security_bits: 128,
            max_depth: DEFAULT_MAX_DEPTH,
            max_cells: None,
            proof_timeout_ms: 30_000,
            claim_policy: ClaimPolicy::FirstResolutionWins,
        }
    }
}

impl ChannelConfig {
    pub fn load(path: impl AsRef<Path>) -> ChannelResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| ChannelError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChannelResult<()> {
        if !SUPPORTED_SECURITY_BITS.contains(&self.security_bits) {
            return Err(ChannelError::Config(format!(
                "security_bits must be one of {SUPPORTED_SECURITY_BITS:?}, got {}",
                self.security_bits
            )));
        }
        if self.max_depth == 0 {
            return Err(ChannelError::Config("max_depth must be positive".into()));
        }
        if self.proof_timeout_ms == 0 {
            return Err(ChannelError::Config("proof_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_depth: self.max_depth,
            max_cells: self.max_cells,
        }
    }

    pub fn proof_timeout(&self) -> Duration {
        Duration::from_millis(self.proof_timeout_ms)
    }
}

//! Deployment Resolution
//!
//! Maps a wallet-reported chain id to the questionnaire contract deployed on
//! that network. A local development deployment, when known, is preferred
//! over the wallet's reported network so a developer can iterate without
//! being forced through a network switch. Resolving to the zero address is
//! not an error: the orchestrator surfaces a "not deployed" state and its
//! availability predicates turn false.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{SurveyError, SurveyResult};

/// Byte width of a contract or signer address
pub const ADDRESS_LEN: usize = 20;

/// Chain id of the local development network
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Chain id of the public test network
pub const TESTNET_CHAIN_ID: u64 = 11_155_111;

/// 20-byte account or contract address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Sentinel meaning "no contract deployed here"
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> SurveyResult<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| SurveyError::malformed(format!("invalid address hex: {e}")))?;
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            SurveyError::malformed(format!("address must be {ADDRESS_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One deployed questionnaire contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Contract address, zero if not deployed
    pub address: Address,
    /// Canonical chain id
    pub chain_id: u64,
    /// Display name for the network
    pub name: String,
}

impl Deployment {
    /// Placeholder record for a network with no known deployment
    pub fn undeployed(chain_id: u64) -> Self {
        Self {
            address: Address::ZERO,
            chain_id,
            name: format!("unknown network (chain {chain_id})"),
        }
    }

    pub fn is_deployed(&self) -> bool {
        !self.address.is_zero()
    }
}

/// Chain-id keyed deployment table
#[derive(Clone, Debug)]
pub struct DeploymentMap {
    entries: HashMap<u64, Deployment>,
}

impl DeploymentMap {
    /// Empty table, no deployments known
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace the deployment for its chain id
    pub fn insert(&mut self, deployment: Deployment) {
        self.entries.insert(deployment.chain_id, deployment);
    }

    pub fn get(&self, chain_id: u64) -> Option<&Deployment> {
        self.entries.get(&chain_id)
    }

    /// Resolve the deployment to use for a wallet-reported chain id.
    ///
    /// When a deployed local development entry is known, it wins unless the
    /// wallet is already on that network (in which case it resolves there
    /// anyway). Without one, the reported chain is looked up directly; an
    /// unknown chain yields an undeployed placeholder.
    pub fn resolve(&self, reported_chain: Option<u64>) -> Deployment {
        if let Some(local) = self.entries.get(&LOCAL_CHAIN_ID) {
            if local.is_deployed() {
                return local.clone();
            }
        }
        match reported_chain {
            Some(chain_id) => self
                .entries
                .get(&chain_id)
                .cloned()
                .unwrap_or_else(|| Deployment::undeployed(chain_id)),
            None => Deployment::undeployed(0),
        }
    }
}

impl Default for DeploymentMap {
    fn default() -> Self {
        let mut map = Self::empty();
        // Deterministic first-deploy address on a fresh local node
        map.insert(Deployment {
            address: Address::from_hex("0x5FbDB2315678afecb367f032d93F642f64180aa3")
                .expect("static address"),
            chain_id: LOCAL_CHAIN_ID,
            name: "Localhost".to_string(),
        });
        // Testnet slot; replaced per environment through configuration
        map.insert(Deployment {
            address: Address::ZERO,
            chain_id: TESTNET_CHAIN_ID,
            name: "Sepolia".to_string(),
        });
        map
    }
}

//! Per-network `PowerUsage` deployment registry
//!
//! Addresses come either from a generated address file
//! (`{"<chainId>": {"address", "chainId", "chainName"}}`) or from
//! hardhat-deploy output under `deployments/<network>/PowerUsage.json`.
//! A network without a deployment is registered with the zero address, which
//! reads as "not deployed".

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use powerlog_core::{AccountAddress, DeploymentStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bindings::EthereumError;

pub const CONTRACT_NAME: &str = "PowerUsage";

/// Hardhat networks the generator knows about: (deployments dir, chain id, chain name)
pub const KNOWN_NETWORKS: [(&str, u64, &str); 2] = [
    ("sepolia", 11_155_111, "sepolia"),
    ("localhost", 31_337, "hardhat"),
];

/// One network's deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEntry {
    pub address: AccountAddress,
    pub chain_id: u64,
    pub chain_name: String,
}

impl DeploymentEntry {
    pub fn is_deployed(&self) -> bool {
        !self.address.is_zero()
    }
}

#[derive(Debug, Deserialize)]
struct HardhatDeployment {
    address: AccountAddress,
    abi: serde_json::Value,
}

/// Contract addresses keyed by chain id, plus the shared ABI when known
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentRegistry {
    entries: BTreeMap<u64, DeploymentEntry>,
    abi: Option<serde_json::Value>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a generated address file
    pub fn from_json(json: &str) -> Result<Self, EthereumError> {
        let raw: BTreeMap<String, DeploymentEntry> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        for (key, entry) in raw {
            let chain_id: u64 = key
                .parse()
                .map_err(|_| EthereumError::Deployment(format!("invalid chain id key '{}'", key)))?;
            if chain_id != entry.chain_id {
                return Err(EthereumError::Deployment(format!(
                    "entry '{}' declares chain id {}",
                    key, entry.chain_id
                )));
            }
            entries.insert(chain_id, entry);
        }
        Ok(Self { entries, abi: None })
    }

    pub fn load(path: &Path) -> Result<Self, EthereumError> {
        let json = fs::read_to_string(path).map_err(|e| {
            EthereumError::Deployment(format!("cannot read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json(&json)?;
        debug!(
            "Loaded {} deployment entries from {}",
            registry.entries.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Build a registry from hardhat-deploy output
    ///
    /// Each known network is optional, but at least one must be deployed.
    /// When both are deployed their ABIs must match. The sepolia ABI is
    /// preferred as the shared ABI.
    pub fn from_hardhat_deployments(deployments_dir: &Path) -> Result<Self, EthereumError> {
        let mut found: Vec<(u64, &str, HardhatDeployment)> = Vec::new();
        for (network, chain_id, chain_name) in KNOWN_NETWORKS {
            let file = deployments_dir
                .join(network)
                .join(format!("{}.json", CONTRACT_NAME));
            if !file.exists() {
                warn!(
                    "No {} deployment at {}; run 'npx hardhat deploy --network {}'",
                    CONTRACT_NAME,
                    file.display(),
                    network
                );
                continue;
            }
            let json = fs::read_to_string(&file).map_err(|e| {
                EthereumError::Deployment(format!("cannot read {}: {}", file.display(), e))
            })?;
            let deployment: HardhatDeployment = serde_json::from_str(&json)?;
            found.push((chain_id, chain_name, deployment));
        }

        let live: Vec<&(u64, &str, HardhatDeployment)> =
            found.iter().filter(|(_, _, d)| !d.address.is_zero()).collect();
        if let [a, b] = live.as_slice() {
            if a.2.abi != b.2.abi {
                return Err(EthereumError::Deployment(format!(
                    "deployments on {} and {} differ; the same ABI cannot serve both networks",
                    a.1, b.1
                )));
            }
        }

        let abi = found
            .first()
            .map(|(_, _, d)| d.abi.clone())
            .ok_or_else(|| {
                EthereumError::Deployment(
                    "no deployment found; deploy the contract to sepolia or localhost first"
                        .to_string(),
                )
            })?;

        let mut entries = BTreeMap::new();
        for (_, chain_id, chain_name) in KNOWN_NETWORKS {
            let address = found
                .iter()
                .find(|(id, _, _)| *id == chain_id)
                .map(|(_, _, d)| d.address)
                .unwrap_or(AccountAddress::ZERO);
            entries.insert(
                chain_id,
                DeploymentEntry {
                    address,
                    chain_id,
                    chain_name: chain_name.to_string(),
                },
            );
        }
        Ok(Self {
            entries,
            abi: Some(abi),
        })
    }

    pub fn insert(&mut self, entry: DeploymentEntry) {
        self.entries.insert(entry.chain_id, entry);
    }

    /// Contract address on `chain_id`; `None` when missing or zero
    pub fn address_for(&self, chain_id: u64) -> Option<AccountAddress> {
        self.entries
            .get(&chain_id)
            .filter(|entry| entry.is_deployed())
            .map(|entry| entry.address)
    }

    pub fn status_for(&self, chain_id: Option<u64>) -> DeploymentStatus {
        match chain_id {
            None => DeploymentStatus::Unknown,
            Some(id) if self.address_for(id).is_some() => DeploymentStatus::Deployed,
            Some(_) => DeploymentStatus::NotDeployed,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &DeploymentEntry> {
        self.entries.values()
    }

    pub fn abi(&self) -> Option<&serde_json::Value> {
        self.abi.as_ref()
    }

    /// Address file contents, keyed by chain id string
    pub fn to_json_pretty(&self) -> Result<String, EthereumError> {
        let keyed: BTreeMap<String, &DeploymentEntry> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.to_string(), entry))
            .collect();
        Ok(serde_json::to_string_pretty(&keyed)?)
    }

    /// Write `PowerUsageAddresses.json` and, when known, `PowerUsageABI.json`
    pub fn write_generated(&self, out_dir: &Path) -> Result<Vec<PathBuf>, EthereumError> {
        fs::create_dir_all(out_dir).map_err(|e| {
            EthereumError::Deployment(format!("cannot create {}: {}", out_dir.display(), e))
        })?;

        let mut written = Vec::new();
        let addresses = out_dir.join(format!("{}Addresses.json", CONTRACT_NAME));
        write_file(&addresses, &self.to_json_pretty()?)?;
        written.push(addresses);

        if let Some(abi) = &self.abi {
            let path = out_dir.join(format!("{}ABI.json", CONTRACT_NAME));
            let body = serde_json::to_string_pretty(&serde_json::json!({ "abi": abi }))?;
            write_file(&path, &body)?;
            written.push(path);
        }

        for path in &written {
            info!("Generated {}", path.display());
        }
        Ok(written)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), EthereumError> {
    fs::write(path, contents)
        .map_err(|e| EthereumError::Deployment(format!("cannot write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESSES: &str = r#"{
        "11155111": { "address": "0x0000000000000000000000000000000000000000", "chainId": 11155111, "chainName": "sepolia" },
        "31337": { "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3", "chainId": 31337, "chainName": "hardhat" }
    }"#;

    #[test]
    fn test_zero_address_is_not_deployed() {
        let registry = DeploymentRegistry::from_json(ADDRESSES).unwrap();
        assert!(registry.address_for(31337).is_some());
        assert_eq!(registry.address_for(11155111), None);
        assert_eq!(registry.status_for(Some(31337)), DeploymentStatus::Deployed);
        assert_eq!(registry.status_for(Some(11155111)), DeploymentStatus::NotDeployed);
        assert_eq!(registry.status_for(Some(1)), DeploymentStatus::NotDeployed);
        assert_eq!(registry.status_for(None), DeploymentStatus::Unknown);
    }

    #[test]
    fn test_mismatched_chain_key_rejected() {
        let json = r#"{"1": {"address": "0x5fbdb2315678afecb367f032d93f642f64180aa3", "chainId": 5, "chainName": "x"}}"#;
        assert!(DeploymentRegistry::from_json(json).is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_field_names() {
        let registry = DeploymentRegistry::from_json(ADDRESSES).unwrap();
        let json = registry.to_json_pretty().unwrap();
        assert!(json.contains("\"chainName\": \"hardhat\""));
        assert_eq!(DeploymentRegistry::from_json(&json).unwrap(), registry);
    }
}

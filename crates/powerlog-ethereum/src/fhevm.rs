//! FHE instance factory for FHEVM chains
//!
//! Chains listed in the mock-chain map are served by the mock relayer of a
//! local FHEVM Hardhat node; every other chain by the relayer service, which
//! needs an [`FheBackend`] for client-side encryption and decryption.

use std::collections::BTreeMap;
use std::sync::Arc;

use powerlog_core::{FheEndpoint, FheFactory, FhevmMetadata, PowerLogError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bindings::EthereumError;
use crate::relayer::{FheBackend, FhevmInstance, RelayerConfig};

/// Local hardhat node used when no mock-chain map is configured
pub const DEFAULT_MOCK_CHAIN: (u64, &str) = (31337, "http://localhost:8545");

/// Which chains are mocked and which relayer serves the rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhevmConfig {
    /// Chain id to the RPC URL of a local FHEVM node
    pub mock_chains: BTreeMap<u64, String>,
    pub relayer: RelayerConfig,
}

impl FhevmConfig {
    pub fn with_defaults() -> Result<Self, EthereumError> {
        let (chain_id, url) = DEFAULT_MOCK_CHAIN;
        Ok(Self {
            mock_chains: BTreeMap::from([(chain_id, url.to_string())]),
            relayer: RelayerConfig::sepolia()?,
        })
    }

    pub fn is_mock_chain(&self, chain_id: u64) -> bool {
        self.mock_chains.contains_key(&chain_id)
    }
}

/// Creates FHE instances for mock and relayer-served chains
pub struct FhevmFactory {
    config: FhevmConfig,
    client: reqwest::Client,
    backend: Option<Arc<dyn FheBackend>>,
}

impl FhevmFactory {
    pub fn new(config: FhevmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            backend: None,
        }
    }

    /// Use `backend` for relayer-side encryption and share reconstruction
    pub fn with_backend(mut self, backend: Arc<dyn FheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &FhevmConfig {
        &self.config
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    async fn create_mock(&self, chain_id: u64, rpc_url: &str) -> Result<FhevmInstance, EthereumError> {
        let version = rpc_call(&self.client, rpc_url, "web3_clientVersion", serde_json::json!([])).await?;
        let version = version.as_str().unwrap_or_default().to_string();
        if !version.to_lowercase().contains("hardhat") {
            return Err(EthereumError::Rpc(format!(
                "{} is not an FHEVM Hardhat node (client version '{}')",
                rpc_url, version
            )));
        }

        let metadata = rpc_call(&self.client, rpc_url, "fhevm_relayer_metadata", serde_json::json!([])).await?;
        let metadata: FhevmMetadata = serde_json::from_value(metadata)?;
        debug!("FHEVM metadata for chain {}: {:?}", chain_id, metadata);

        Ok(FhevmInstance::for_node(self.client.clone(), chain_id, rpc_url, &metadata))
    }
}

impl FheFactory for FhevmFactory {
    type Instance = FhevmInstance;

    async fn create(&self, endpoint: &FheEndpoint) -> Result<FhevmInstance, PowerLogError> {
        if let Some(mock_url) = self.config.mock_chains.get(&endpoint.chain_id) {
            info!("Chain {} is a mock chain, using {}", endpoint.chain_id, mock_url);
            return Ok(self.create_mock(endpoint.chain_id, mock_url).await?);
        }

        let backend = self.backend.clone().ok_or_else(|| {
            PowerLogError::fhe(format!(
                "no FHE backend for chain {}; only mock chains ({}) can encrypt without one",
                endpoint.chain_id,
                self.config
                    .mock_chains
                    .keys()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        let instance =
            FhevmInstance::connect(self.client.clone(), endpoint.chain_id, &self.config.relayer, backend)
                .await?;
        Ok(instance)
    }
}

/// Plain JSON-RPC call returning the `result` member
pub async fn rpc_call(
    client: &reqwest::Client,
    rpc_url: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, EthereumError> {
    let rpc_request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });

    let response = client
        .post(rpc_url)
        .json(&rpc_request)
        .send()
        .await
        .map_err(|e| EthereumError::Rpc(format!("{} request failed: {}", method, e)))?;

    let mut rpc_response: serde_json::Value = response
        .json()
        .await
        .map_err(|e| EthereumError::Rpc(format!("failed to parse {} response: {}", method, e)))?;

    if let Some(error) = rpc_response.get("error") {
        return Err(EthereumError::Rpc(format!("{} failed: {}", method, error)));
    }
    rpc_response
        .get_mut("result")
        .map(serde_json::Value::take)
        .ok_or_else(|| EthereumError::Rpc(format!("no result in {} response", method)))
}

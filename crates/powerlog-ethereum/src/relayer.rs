//! FHE client speaking the FHEVM relayer protocol
//!
//! The relayer verifies encrypted inputs (returning the handles and
//! coprocessor signatures that make up the input proof) and gathers
//! user-decryption shares from the KMS. On a relayer-served network it is an
//! HTTP service that also publishes the FHE public key; on a Hardhat FHEVM
//! node the same requests are JSON-RPC methods of the node itself.
//!
//! Building the ciphertext and reconstructing a plaintext from the response
//! is done by an [`FheBackend`].

use std::sync::Arc;

use powerlog_core::authorization::unix_now;
use powerlog_core::protocol::encode_input_proof;
use powerlog_core::{
    AccountAddress, CiphertextHandle, DecryptionAuthorization, DecryptionKeypair,
    EncryptedInput, FheInstance, FheType, FhevmMetadata, PowerLogError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::bindings::{from_address as from_alloy_address, parse_address, EthereumError};
use crate::fhevm::rpc_call;
use crate::mock_node::MockNodeBackend;

pub const SEPOLIA_RELAYER_URL: &str = "https://relayer.testnet.zama.cloud";

/// Protocol addresses and endpoint of a relayer-served network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayerConfig {
    pub relayer_url: String,
    pub acl_address: AccountAddress,
    pub kms_verifier_address: AccountAddress,
    pub input_verifier_address: AccountAddress,
    /// EIP-712 verifying contract for user decryption
    pub decryption_verifier_address: AccountAddress,
}

impl RelayerConfig {
    /// Zama's Sepolia testnet deployment
    pub fn sepolia() -> Result<Self, EthereumError> {
        Ok(Self {
            relayer_url: SEPOLIA_RELAYER_URL.to_string(),
            acl_address: from_alloy_address(parse_address(
                "0x687820221192C5B662b25367F70076A37bc79b6c",
            )?),
            kms_verifier_address: from_alloy_address(parse_address(
                "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC",
            )?),
            input_verifier_address: from_alloy_address(parse_address(
                "0xbc91f3daD1A5F19F8390c400196e58073B6a0BC4",
            )?),
            decryption_verifier_address: from_alloy_address(parse_address(
                "0xb6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1",
            )?),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        join_url(&self.relayer_url, path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Where relayer requests are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayerTransport {
    /// Relayer HTTP service, `POST {url}/v1/...`
    Http(String),
    /// FHEVM Hardhat node, `fhevm_relayer_v1_...` JSON-RPC methods
    NodeRpc(String),
}

#[derive(Debug, Clone, Copy)]
enum RelayerOperation {
    InputProof,
    UserDecrypt,
}

impl RelayerOperation {
    fn path(self) -> &'static str {
        match self {
            RelayerOperation::InputProof => "v1/input-proof",
            RelayerOperation::UserDecrypt => "v1/user-decrypt",
        }
    }

    fn rpc_method(self) -> &'static str {
        match self {
            RelayerOperation::InputProof => "fhevm_relayer_v1_input_proof",
            RelayerOperation::UserDecrypt => "fhevm_relayer_v1_user_decrypt",
        }
    }
}

/// FHE public parameters fetched from the relayer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicParams {
    pub public_key_id: String,
    pub public_key: Vec<u8>,
}

/// Client-side FHE primitives the relayer protocol relies on
pub trait FheBackend: Send + Sync {
    /// Pack and encrypt a `u32` under the network key, bound to contract and user
    fn encrypt_u32(
        &self,
        params: &PublicParams,
        contract: AccountAddress,
        user: AccountAddress,
        value: u32,
    ) -> Result<Vec<u8>, PowerLogError>;

    /// Keypair the KMS re-encrypts decryption shares for
    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError>;

    /// Combine the KMS shares for `handle` into its plaintext
    fn reconstruct(
        &self,
        keypair: &DecryptionKeypair,
        handle: CiphertextHandle,
        fhe_type: FheType,
        shares: &[serde_json::Value],
    ) -> Result<u64, PowerLogError>;
}

#[derive(Debug, Deserialize)]
struct KeyUrlResponse {
    response: KeyUrlBody,
}

#[derive(Debug, Deserialize)]
struct KeyUrlBody {
    fhe_key_info: Vec<FheKeyInfo>,
}

#[derive(Debug, Deserialize)]
struct FheKeyInfo {
    fhe_public_key: KeyLocation,
}

#[derive(Debug, Deserialize)]
struct KeyLocation {
    data_id: String,
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InputProofResponse {
    response: InputProofBody,
}

#[derive(Debug, Deserialize)]
struct InputProofBody {
    handles: Vec<String>,
    signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserDecryptResponse {
    response: Vec<serde_json::Value>,
}

/// FHE instance for one FHEVM chain
#[derive(Clone)]
pub struct FhevmInstance {
    chain_id: u64,
    decryption_verifier: AccountAddress,
    transport: RelayerTransport,
    params: PublicParams,
    client: reqwest::Client,
    backend: Arc<dyn FheBackend>,
}

impl std::fmt::Debug for FhevmInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhevmInstance")
            .field("chain_id", &self.chain_id)
            .field("transport", &self.transport)
            .field("public_key_id", &self.params.public_key_id)
            .finish()
    }
}

impl FhevmInstance {
    /// Fetch the public parameters from a relayer service and build an instance for `chain_id`
    pub async fn connect(
        client: reqwest::Client,
        chain_id: u64,
        config: &RelayerConfig,
        backend: Arc<dyn FheBackend>,
    ) -> Result<Self, EthereumError> {
        let params = fetch_public_params(&client, config).await?;
        info!(
            "Fetched FHE public key {} ({} bytes) from {}",
            params.public_key_id,
            params.public_key.len(),
            config.relayer_url
        );
        Ok(Self {
            chain_id,
            decryption_verifier: config.decryption_verifier_address,
            transport: RelayerTransport::Http(config.relayer_url.clone()),
            params,
            client,
            backend,
        })
    }

    /// Instance served by the mock relayer of an FHEVM Hardhat node
    pub fn for_node(
        client: reqwest::Client,
        chain_id: u64,
        rpc_url: &str,
        metadata: &FhevmMetadata,
    ) -> Self {
        Self {
            chain_id,
            decryption_verifier: metadata.kms_verifier_address,
            transport: RelayerTransport::NodeRpc(rpc_url.to_string()),
            params: PublicParams {
                public_key_id: "mock".to_string(),
                public_key: Vec::new(),
            },
            client,
            backend: Arc::new(MockNodeBackend),
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.transport, RelayerTransport::NodeRpc(_))
    }

    pub fn transport(&self) -> &RelayerTransport {
        &self.transport
    }

    pub fn params(&self) -> &PublicParams {
        &self.params
    }

    async fn request<T: DeserializeOwned>(
        &self,
        operation: RelayerOperation,
        body: serde_json::Value,
    ) -> Result<T, EthereumError> {
        let value = match &self.transport {
            RelayerTransport::Http(url) => {
                let path = operation.path();
                let response = self.client.post(join_url(url, path)).json(&body).send().await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(EthereumError::Rpc(format!(
                        "relayer {} returned {}: {}",
                        path, status, text
                    )));
                }
                response.json().await?
            }
            RelayerTransport::NodeRpc(url) => {
                rpc_call(&self.client, url, operation.rpc_method(), json!([body])).await?
            }
        };
        Ok(serde_json::from_value(value)?)
    }
}

async fn fetch_public_params(
    client: &reqwest::Client,
    config: &RelayerConfig,
) -> Result<PublicParams, EthereumError> {
    let key_url: KeyUrlResponse = client
        .get(config.endpoint("v1/keyurl"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let location = key_url
        .response
        .fhe_key_info
        .into_iter()
        .next()
        .map(|info| info.fhe_public_key)
        .ok_or_else(|| EthereumError::Rpc("relayer returned no FHE public key".to_string()))?;
    let url = location
        .urls
        .first()
        .ok_or_else(|| EthereumError::Rpc("FHE public key has no download URL".to_string()))?;

    debug!("Downloading FHE public key from {}", url);
    let public_key = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?
        .to_vec();

    Ok(PublicParams {
        public_key_id: location.data_id,
        public_key,
    })
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, EthereumError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| EthereumError::Rpc(format!("invalid hex in {}: {}", field, e)))
}

impl FheInstance for FhevmInstance {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn decryption_verifier(&self) -> AccountAddress {
        self.decryption_verifier
    }

    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError> {
        self.backend.generate_keypair()
    }

    async fn encrypt_u32(
        &self,
        contract: AccountAddress,
        account: AccountAddress,
        value: u32,
    ) -> Result<EncryptedInput, PowerLogError> {
        let ciphertext = self
            .backend
            .encrypt_u32(&self.params, contract, account, value)?;

        let body = json!({
            "contractAddress": contract.to_string(),
            "userAddress": account.to_string(),
            "ciphertextWithInputVerification": hex::encode(&ciphertext),
            "contractChainId": format!("{:#x}", self.chain_id),
            "extraData": "0x00",
        });
        let proof: InputProofResponse = self.request(RelayerOperation::InputProof, body).await?;

        let handles = proof
            .response
            .handles
            .iter()
            .map(|h| h.parse::<CiphertextHandle>())
            .collect::<Result<Vec<_>, _>>()?;
        let signatures = proof
            .response
            .signatures
            .iter()
            .map(|s| decode_hex("signature", s))
            .collect::<Result<Vec<_>, _>>()?;
        let handle = *handles
            .first()
            .ok_or_else(|| PowerLogError::fhe("relayer returned no input handle"))?;
        debug!(
            "Input {} verified with {} coprocessor signatures",
            handle,
            signatures.len()
        );

        Ok(EncryptedInput {
            handle,
            proof: encode_input_proof(&handles, &signatures, &[0x00]),
        })
    }

    async fn user_decrypt(
        &self,
        fhe_type: FheType,
        handle: CiphertextHandle,
        contract: AccountAddress,
        authorization: &DecryptionAuthorization,
    ) -> Result<u64, PowerLogError> {
        if handle.is_zero() {
            return Err(PowerLogError::fhe("refusing to decrypt the zero handle"));
        }
        if authorization.chain_id != self.chain_id {
            return Err(PowerLogError::Authorization(format!(
                "authorization was signed for chain {}, instance is on {}",
                authorization.chain_id, self.chain_id
            )));
        }
        if !authorization.is_valid_at(unix_now()) {
            return Err(PowerLogError::Authorization("authorization expired".to_string()));
        }
        if !authorization.covers(&contract) {
            return Err(PowerLogError::Authorization(format!(
                "authorization does not cover contract {}",
                contract
            )));
        }

        let contracts: Vec<String> = authorization
            .contract_addresses
            .iter()
            .map(|c| c.to_string())
            .collect();
        let body = json!({
            "handleContractPairs": [{ "handle": handle.to_string(), "contractAddress": contract.to_string() }],
            "requestValidity": {
                "startTimestamp": authorization.start_timestamp.to_string(),
                "durationDays": authorization.duration_days.to_string(),
            },
            "contractsChainId": self.chain_id.to_string(),
            "contractAddresses": contracts,
            "userAddress": authorization.user_address.to_string(),
            "signature": hex::encode(&authorization.signature),
            "publicKey": hex::encode(&authorization.keypair.public_key),
            "extraData": "0x00",
        });
        let shares: UserDecryptResponse = self.request(RelayerOperation::UserDecrypt, body).await?;

        let value = self
            .backend
            .reconstruct(&authorization.keypair, handle, fhe_type, &shares.response)?;
        if value > fhe_type.max_value() {
            return Err(PowerLogError::fhe(format!(
                "reconstructed value {} exceeds {:?}",
                value, fhe_type
            )));
        }
        Ok(value)
    }
}

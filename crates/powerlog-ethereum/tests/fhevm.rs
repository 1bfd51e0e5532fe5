//! FHE factory and instance tests against stand-in relayer and node servers

use std::collections::BTreeMap;
use std::sync::Arc;

use mockito::{Matcher, Server, ServerGuard};
use powerlog_core::authorization::unix_now;
use powerlog_core::protocol::{input_proof_signers, parse_input_proof};
use powerlog_core::{
    AccountAddress, CiphertextHandle, DecryptionAuthorization, DecryptionKeypair, FheInitializer,
    FheInstance, FheRequest, FheStatus, FheType, PowerLogError,
};
use powerlog_ethereum::{
    FheBackend, FhevmConfig, FhevmFactory, PublicParams, RelayerConfig, RelayerTransport,
};
use serde_json::json;

const CONTRACT: AccountAddress = AccountAddress([0xc0; 20]);
const ALICE: AccountAddress = AccountAddress([0xa1; 20]);
const HANDLE: CiphertextHandle = CiphertextHandle([0x5a; 32]);

/// Backend that "encrypts" to a readable tag and reads shares back as numbers
struct TagBackend;

impl FheBackend for TagBackend {
    fn encrypt_u32(
        &self,
        params: &PublicParams,
        _contract: AccountAddress,
        _user: AccountAddress,
        value: u32,
    ) -> Result<Vec<u8>, PowerLogError> {
        assert_eq!(params.public_key, b"network-public-key");
        Ok(format!("ct:{}", value).into_bytes())
    }

    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError> {
        Ok(DecryptionKeypair {
            public_key: vec![0x01; 32],
            private_key: vec![0x02; 32],
        })
    }

    fn reconstruct(
        &self,
        _keypair: &DecryptionKeypair,
        _handle: CiphertextHandle,
        _fhe_type: FheType,
        shares: &[serde_json::Value],
    ) -> Result<u64, PowerLogError> {
        shares
            .iter()
            .filter_map(|share| share["share"].as_str()?.parse::<u64>().ok())
            .max()
            .ok_or_else(|| PowerLogError::fhe("no shares"))
    }
}

fn authorization(chain_id: u64) -> DecryptionAuthorization {
    DecryptionAuthorization {
        user_address: ALICE,
        chain_id,
        contract_addresses: vec![CONTRACT],
        start_timestamp: unix_now(),
        duration_days: 1,
        keypair: TagBackend.generate_keypair().unwrap(),
        signature: vec![0x1b; 65],
    }
}

fn relayer_config(url: &str) -> FhevmConfig {
    FhevmConfig {
        mock_chains: BTreeMap::new(),
        relayer: RelayerConfig {
            relayer_url: url.to_string(),
            ..RelayerConfig::sepolia().unwrap()
        },
    }
}

fn rpc_result(result: serde_json::Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

/// Serve the node-side JSON-RPC methods of an FHEVM Hardhat node
async fn mock_node(server: &mut ServerGuard) {
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "web3_clientVersion"})))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!("HardhatNetwork/2.22.19/@fhevm/hardhat-plugin")))
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "fhevm_relayer_metadata"})))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!({
            "ACLAddress": "0x50157cffd6bbfa2dece204a89ec419c23ef5755d",
            "InputVerifierAddress": "0x901f8942346f7ab3a01f6d7613119bca447bb030",
            "KMSVerifierAddress": "0x1364cbbf2cdf5032c47d8226a6f6fbd2afcdacac"
        })))
        .create_async()
        .await;
}

#[tokio::test]
async fn test_unreachable_mock_node_reports_error_state() {
    let mut config = relayer_config("http://127.0.0.1:9");
    // Nothing listens on port 9
    config.mock_chains.insert(31337, "http://127.0.0.1:9".to_string());
    let init = FheInitializer::new(FhevmFactory::new(config));
    let status = init
        .refresh(&FheRequest::new("http://127.0.0.1:9", 31337))
        .await;
    assert_eq!(status.label(), "error");
    assert!(status.error().unwrap().contains("web3_clientVersion"));
}

#[tokio::test]
async fn test_relayer_chain_without_backend_is_not_ready() {
    let init = FheInitializer::new(FhevmFactory::new(relayer_config("http://127.0.0.1:9")));
    let status = init
        .refresh(&FheRequest::new("http://127.0.0.1:9", 11155111))
        .await;
    assert!(matches!(status, FheStatus::Error(_)));
    assert!(status.error().unwrap().contains("no FHE backend"));
}

#[tokio::test]
async fn test_relayer_encrypt_and_decrypt_through_backend() {
    let mut server = Server::new_async().await;
    let url = server.url();
    server
        .mock("GET", "/v1/keyurl")
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {"fhe_key_info": [{"fhe_public_key": {
                "data_id": "pk-1",
                "urls": [format!("{}/keys/pk-1", url)]
            }}]}})
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/keys/pk-1")
        .with_body("network-public-key")
        .create_async()
        .await;
    let input_proof = server
        .mock("POST", "/v1/input-proof")
        .match_body(Matcher::PartialJson(json!({
            "contractAddress": CONTRACT.to_string(),
            "userAddress": ALICE.to_string(),
            "ciphertextWithInputVerification": hex::encode("ct:150"),
            "contractChainId": "0xaa36a7",
        })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {
                "handles": [HANDLE.to_string()],
                "signatures": [format!("0x{}", "11".repeat(65)), format!("0x{}", "22".repeat(65))]
            }})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/v1/user-decrypt")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"userAddress": ALICE.to_string()})),
            Matcher::Regex(HANDLE.to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(json!({"response": [{"share": "150"}, {"share": "150"}]}).to_string())
        .create_async()
        .await;

    let factory = FhevmFactory::new(relayer_config(&url)).with_backend(Arc::new(TagBackend));
    let init = FheInitializer::new(factory);
    let status = init.refresh(&FheRequest::new(url.clone(), 11155111)).await;
    let fhe = status.instance().expect("relayer instance should be ready");
    assert!(!fhe.is_mock());
    assert_eq!(fhe.transport(), &RelayerTransport::Http(url.clone()));
    assert_eq!(fhe.params().public_key_id, "pk-1");

    let input = fhe.encrypt_u32(CONTRACT, ALICE, 150).await.unwrap();
    input_proof.assert_async().await;
    assert_eq!(input.handle, HANDLE);
    assert_eq!(parse_input_proof(&input.proof).unwrap(), vec![HANDLE]);
    assert_eq!(input_proof_signers(&input.proof), 2);

    let value = fhe
        .user_decrypt(FheType::Euint32, HANDLE, CONTRACT, &authorization(11155111))
        .await
        .unwrap();
    assert_eq!(value, 150);
}

#[tokio::test]
async fn test_mock_chain_uses_node_relayer_methods() {
    let mut server = Server::new_async().await;
    let url = server.url();
    mock_node(&mut server).await;
    let input_proof = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"method": "fhevm_relayer_v1_input_proof"})),
            Matcher::Regex(CONTRACT.to_string()),
            Matcher::Regex(ALICE.to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!({"response": {
            "handles": [HANDLE.to_string()],
            "signatures": [format!("0x{}", "33".repeat(65))]
        }})))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "fhevm_relayer_v1_user_decrypt"})))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!({"response": [{"handle": HANDLE.to_string(), "value": "175"}]})))
        .create_async()
        .await;

    let mut config = relayer_config("http://127.0.0.1:9");
    config.mock_chains.insert(31337, url.clone());
    let init = FheInitializer::new(FhevmFactory::new(config));
    let status = init.refresh(&FheRequest::new(url.clone(), 31337)).await;
    let fhe = status.instance().expect("mock instance should be ready");
    assert!(fhe.is_mock());
    assert_eq!(fhe.decryption_verifier().0[0], 0x13);

    let input = fhe.encrypt_u32(CONTRACT, ALICE, 175).await.unwrap();
    input_proof.assert_async().await;
    assert_eq!(input.handle, HANDLE);
    assert_eq!(input_proof_signers(&input.proof), 1);

    let value = fhe
        .user_decrypt(FheType::Euint32, HANDLE, CONTRACT, &authorization(31337))
        .await
        .unwrap();
    assert_eq!(value, 175);
}

#[tokio::test]
async fn test_node_that_is_not_hardhat_is_rejected() {
    let mut server = Server::new_async().await;
    let url = server.url();
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "web3_clientVersion"})))
        .with_header("content-type", "application/json")
        .with_body(rpc_result(json!("Geth/v1.14.0")))
        .create_async()
        .await;

    let mut config = relayer_config("http://127.0.0.1:9");
    config.mock_chains.insert(31337, url.clone());
    let init = FheInitializer::new(FhevmFactory::new(config));
    let status = init.refresh(&FheRequest::new(url, 31337)).await;
    assert!(status.error().unwrap().contains("not an FHEVM Hardhat node"));
}

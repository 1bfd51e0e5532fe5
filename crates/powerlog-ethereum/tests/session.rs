//! Chain switching: wallet, session and FHE instance are re-derived together

use std::collections::BTreeMap;
use std::sync::Arc;

use mockito::{Matcher, Server, ServerGuard};
use powerlog_core::{
    AccountAddress, CiphertextHandle, DecryptionKeypair, DeploymentStatus, FheInitializer,
    FheInstance, FheType, InMemorySignatureStorage, PowerLogError, SignatureStorage,
};
use powerlog_ethereum::{
    derive_session, fhe_request, AlloyWallet, DeploymentEntry, DeploymentRegistry, FheBackend,
    FhevmConfig, FhevmFactory, PublicParams, RelayerConfig,
};
use serde_json::json;

// Hardhat's first default account
const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcc7ae784f3ef2ff80";
const CONTRACT: AccountAddress = AccountAddress([0xc0; 20]);

struct UnusedBackend;

impl FheBackend for UnusedBackend {
    fn encrypt_u32(
        &self,
        _params: &PublicParams,
        _contract: AccountAddress,
        _user: AccountAddress,
        _value: u32,
    ) -> Result<Vec<u8>, PowerLogError> {
        Err(PowerLogError::fhe("not used"))
    }

    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError> {
        Err(PowerLogError::fhe("not used"))
    }

    fn reconstruct(
        &self,
        _keypair: &DecryptionKeypair,
        _handle: CiphertextHandle,
        _fhe_type: FheType,
        _shares: &[serde_json::Value],
    ) -> Result<u64, PowerLogError> {
        Err(PowerLogError::fhe("not used"))
    }
}

async fn rpc_method(server: &mut ServerGuard, method: &str, result: serde_json::Value) {
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": method})))
        .with_header("content-type", "application/json")
        .with_body(json!({"jsonrpc": "2.0", "id": 0, "result": result}).to_string())
        .create_async()
        .await;
}

/// Local FHEVM Hardhat node on chain 31337
async fn hardhat_node() -> ServerGuard {
    let mut server = Server::new_async().await;
    rpc_method(&mut server, "eth_chainId", json!("0x7a69")).await;
    rpc_method(&mut server, "web3_clientVersion", json!("HardhatNetwork/2.22.19")).await;
    rpc_method(
        &mut server,
        "fhevm_relayer_metadata",
        json!({
            "ACLAddress": "0x50157cffd6bbfa2dece204a89ec419c23ef5755d",
            "InputVerifierAddress": "0x901f8942346f7ab3a01f6d7613119bca447bb030",
            "KMSVerifierAddress": "0x1364cbbf2cdf5032c47d8226a6f6fbd2afcdacac"
        }),
    )
    .await;
    server
}

/// Sepolia RPC endpoint that also serves the relayer key routes
async fn sepolia_endpoint() -> ServerGuard {
    let mut server = Server::new_async().await;
    let url = server.url();
    rpc_method(&mut server, "eth_chainId", json!("0xaa36a7")).await;
    server
        .mock("GET", "/v1/keyurl")
        .with_header("content-type", "application/json")
        .with_body(
            json!({"response": {"fhe_key_info": [{"fhe_public_key": {
                "data_id": "pk-sepolia",
                "urls": [format!("{}/keys/pk-sepolia", url)]
            }}]}})
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/keys/pk-sepolia")
        .with_body("network-public-key")
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn test_switch_chain_rederives_session_and_fhe_instance() {
    let local = hardhat_node().await;
    let sepolia = sepolia_endpoint().await;

    let mut registry = DeploymentRegistry::new();
    registry.insert(DeploymentEntry {
        address: CONTRACT,
        chain_id: 31337,
        chain_name: "hardhat".to_string(),
    });
    let config = FhevmConfig {
        mock_chains: BTreeMap::from([(31337, local.url())]),
        relayer: RelayerConfig {
            relayer_url: sepolia.url(),
            ..RelayerConfig::sepolia().unwrap()
        },
    };
    let init = FheInitializer::new(FhevmFactory::new(config).with_backend(Arc::new(UnusedBackend)));
    let storage: Arc<dyn SignatureStorage> = Arc::new(InMemorySignatureStorage::new());

    let wallet = AlloyWallet::connect(&local.url(), Some(KEY)).await.unwrap();
    let session = derive_session(&wallet, &registry, init.subscribe(), storage.clone());
    assert_eq!(session.chain_id, Some(31337));
    assert_eq!(session.deployment, DeploymentStatus::Deployed);
    assert!(session.contract.is_some());
    let before = init.refresh(&fhe_request(&wallet)).await;
    let before = before.instance().expect("hardhat instance should be ready");
    assert_eq!(before.chain_id(), 31337);
    assert!(before.is_mock());

    let switched = wallet.switch_chain(&sepolia.url()).await.unwrap();
    assert_eq!(switched.chain_id(), 11155111);
    assert_eq!(switched.rpc_url(), sepolia.url());
    assert_eq!(switched.account(), wallet.account());

    let session = derive_session(&switched, &registry, init.subscribe(), storage.clone());
    assert_eq!(session.chain_id, Some(11155111));
    assert_eq!(session.deployment, DeploymentStatus::NotDeployed);
    assert!(session.contract.is_none());
    assert!(session.signer.is_some());

    let after = init.refresh(&fhe_request(&switched)).await;
    let after = after.instance().expect("relayer instance should be ready");
    assert_eq!(after.chain_id(), 11155111);
    assert!(!after.is_mock());
    assert!(!Arc::ptr_eq(&before, &after));
    let published = session.fhe.borrow().instance().map(|fhe| fhe.chain_id());
    assert_eq!(published, Some(11155111));
}

#[tokio::test]
async fn test_keyless_wallet_stays_read_only_after_switch() {
    let local = hardhat_node().await;
    let sepolia = sepolia_endpoint().await;

    let wallet = AlloyWallet::connect(&local.url(), None).await.unwrap();
    assert_eq!(wallet.chain_id(), 31337);
    let switched = wallet.switch_chain(&sepolia.url()).await.unwrap();
    assert_eq!(switched.chain_id(), 11155111);
    assert!(switched.account().is_none());
    assert!(switched.signer().is_none());
    assert!(!switched.is_connected());

    let config = FhevmConfig::with_defaults().unwrap();
    let init = FheInitializer::new(FhevmFactory::new(config));
    let session = derive_session(
        &switched,
        &DeploymentRegistry::new(),
        init.subscribe(),
        Arc::new(InMemorySignatureStorage::new()),
    );
    assert!(session.account.is_none());
    assert!(session.signer.is_none());
    assert_eq!(session.chain_id, Some(11155111));
}

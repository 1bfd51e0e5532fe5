//! Alloy-backed implementations for the encrypted power-usage log
//!
//! This crate provides the Ethereum side of `powerlog-core`: the typed
//! `PowerUsage` contract binding, a wallet/provider adapter able to sign
//! decryption requests, the per-network deployment registry, and the FHE
//! instance factory for FHEVM chains, served either by a relayer service or
//! by the mock relayer of a local Hardhat node.

pub mod bindings;
mod contract;
mod deployments;
mod fhevm;
mod mock_node;
mod relayer;
mod session;
mod wallet;

pub use crate::bindings::{EthereumError, PowerUsage};
pub use contract::AlloyRecordContract;
pub use deployments::{DeploymentEntry, DeploymentRegistry, CONTRACT_NAME, KNOWN_NETWORKS};
pub use fhevm::{rpc_call, FhevmConfig, FhevmFactory, DEFAULT_MOCK_CHAIN};
pub use mock_node::{encode_mock_ciphertext, MockNodeBackend};
pub use relayer::{
    FheBackend, FhevmInstance, PublicParams, RelayerConfig, RelayerTransport, SEPOLIA_RELAYER_URL,
};
pub use session::{derive_session, fhe_request, EthereumSession};
pub use wallet::{decryption_typed_data, AlloyWallet, WalletSigner};

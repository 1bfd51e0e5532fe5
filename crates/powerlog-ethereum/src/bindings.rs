//! `PowerUsage` contract bindings and alloy conversions
//!
//! Declares the `PowerUsage` contract interface and the EIP-712 decryption
//! request with `sol!`, and converts between alloy primitives and the
//! chain-agnostic types of `powerlog-core`.

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use powerlog_core::{AccountAddress, CiphertextHandle, PowerLogError};

sol! {
    /// Encrypted power-usage log contract
    #[sol(rpc)]
    contract PowerUsage {
        function addRecord(bytes32 encryptedUsage, bytes calldata inputProof, uint32 period) external returns (uint256);
        function getTotalRecords() external view returns (uint256);
        function getUserRecordCount(address user) external view returns (uint256);
        function getUserRecordByIndex(address user, uint256 index) external view returns (uint256);
        function getRecordMetadata(uint256 recordId) external view returns (address owner, uint256 timestamp, uint32 period);
        function getRecordUsage(uint256 recordId) external view returns (bytes32);
        function recordExists(uint256 recordId) external view returns (bool);
    }

    /// Typed-data message signed to authorize user decryption
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
        bytes extraData;
    }
}

/// EIP-712 domain name of the decryption verifier
pub const DECRYPTION_DOMAIN_NAME: &str = "Decryption";
/// EIP-712 domain version of the decryption verifier
pub const DECRYPTION_DOMAIN_VERSION: &str = "1";

/// Errors raised by the alloy-backed implementations
#[derive(Debug, thiserror::Error)]
pub enum EthereumError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("Transaction confirmation failed: {0}")]
    Pending(#[from] alloy::providers::PendingTransactionError),

    #[error("Signing failed: {0}")]
    Signer(#[from] alloy::signers::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),
}

impl From<EthereumError> for PowerLogError {
    fn from(err: EthereumError) -> Self {
        match err {
            EthereumError::InvalidAddress(_)
            | EthereumError::InvalidUrl(_)
            | EthereumError::Deployment(_) => PowerLogError::Configuration(err.to_string()),
            EthereumError::Rpc(_) | EthereumError::Http(_) => {
                PowerLogError::Transport(err.to_string())
            }
            EthereumError::Contract(alloy::contract::Error::TransportError(_)) => {
                PowerLogError::Transport(err.to_string())
            }
            EthereumError::Contract(_) | EthereumError::Reverted(_) | EthereumError::Pending(_) => {
                PowerLogError::Transaction(err.to_string())
            }
            EthereumError::Signer(_) => PowerLogError::Authorization(err.to_string()),
            EthereumError::Serialization(_) => PowerLogError::Serialization(err.to_string()),
            EthereumError::FeatureNotEnabled(_) => PowerLogError::Fhe(err.to_string()),
        }
    }
}

pub fn to_address(address: AccountAddress) -> Address {
    Address::from(address.0)
}

pub fn from_address(address: Address) -> AccountAddress {
    AccountAddress(address.0 .0)
}

pub fn to_b256(handle: CiphertextHandle) -> B256 {
    B256::from(handle.0)
}

pub fn from_b256(value: B256) -> CiphertextHandle {
    CiphertextHandle(value.0)
}

/// Narrow a contract `uint256` to `u64`
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64, EthereumError> {
    u64::try_from(value)
        .map_err(|_| EthereumError::Rpc(format!("{} {} does not fit in 64 bits", what, value)))
}

/// Convert hex string to Address
pub fn parse_address(addr_str: &str) -> Result<Address, EthereumError> {
    addr_str
        .trim()
        .parse()
        .map_err(|e| EthereumError::InvalidAddress(format!("{}: {}", addr_str, e)))
}

/// Parse an RPC endpoint URL
pub fn parse_url(url: &str) -> Result<reqwest::Url, EthereumError> {
    url.parse()
        .map_err(|e| EthereumError::InvalidUrl(format!("{}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_address_round_trip() {
        let addr = "0x742d35Cc6634C0532925a3b8D97C2e0D8b2D9C00";
        let parsed = parse_address(addr).unwrap();
        assert_eq!(to_address(from_address(parsed)), parsed);
        assert!(parse_address("0x1234").is_err());
    }

    #[test]
    fn test_handle_conversion() {
        let mut bytes = [0u8; 32];
        bytes[30] = 4;
        let handle = CiphertextHandle(bytes);
        assert_eq!(from_b256(to_b256(handle)), handle);
    }

    #[test]
    fn test_selectors_match_signatures() {
        assert_eq!(
            PowerUsage::addRecordCall::SIGNATURE,
            "addRecord(bytes32,bytes,uint32)"
        );
        assert_eq!(PowerUsage::recordExistsCall::SIGNATURE, "recordExists(uint256)");
    }

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(u256_to_u64(U256::from(7u64), "count").unwrap(), 7);
        assert!(u256_to_u64(U256::MAX, "count").is_err());
    }

    #[test]
    fn test_error_taxonomy() {
        let err: PowerLogError = EthereumError::Reverted("0xab".to_string()).into();
        assert!(matches!(err, PowerLogError::Transaction(_)));
        let err: PowerLogError = EthereumError::InvalidUrl("x".to_string()).into();
        assert!(matches!(err, PowerLogError::Configuration(_)));
        let err: PowerLogError = EthereumError::Rpc("down".to_string()).into();
        assert!(matches!(err, PowerLogError::Transport(_)));
    }
}

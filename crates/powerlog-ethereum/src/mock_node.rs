//! FHE backend for FHEVM Hardhat nodes
//!
//! A development node runs its coprocessor in mock mode. Inputs travel as
//! cleartext and the node's mock relayer signs the input proof with its
//! coprocessor keys, so `addRecord` passes the on-chain input verifier.
//! User decryption is answered with the cleartext of each requested handle,
//! after the node has checked the ACL and the EIP-712 signature.

use powerlog_core::{AccountAddress, CiphertextHandle, DecryptionKeypair, FheType, PowerLogError};
use rand::RngCore;

use crate::relayer::{FheBackend, PublicParams};

/// Random bytes appended to every mock ciphertext so equal values get distinct handles
const SALT_LEN: usize = 32;

/// Backend used with [`RelayerTransport::NodeRpc`](crate::RelayerTransport::NodeRpc)
#[derive(Debug, Clone, Copy, Default)]
pub struct MockNodeBackend;

/// Encode cleartext inputs: count, then type id and 32-byte big-endian value per input, then a salt
pub fn encode_mock_ciphertext(values: &[(FheType, u64)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + values.len() * 33 + SALT_LEN);
    out.push(values.len() as u8);
    for (fhe_type, value) in values {
        out.push(fhe_type.type_id());
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        out.extend_from_slice(&word);
    }
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    out.extend_from_slice(&salt);
    out
}

fn parse_clear_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        serde_json::Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

impl FheBackend for MockNodeBackend {
    fn encrypt_u32(
        &self,
        _params: &PublicParams,
        _contract: AccountAddress,
        _user: AccountAddress,
        value: u32,
    ) -> Result<Vec<u8>, PowerLogError> {
        Ok(encode_mock_ciphertext(&[(FheType::Euint32, u64::from(value))]))
    }

    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError> {
        let mut rng = rand::thread_rng();
        let mut public_key = vec![0u8; 32];
        let mut private_key = vec![0u8; 32];
        rng.fill_bytes(&mut public_key);
        rng.fill_bytes(&mut private_key);
        Ok(DecryptionKeypair {
            public_key,
            private_key,
        })
    }

    fn reconstruct(
        &self,
        _keypair: &DecryptionKeypair,
        handle: CiphertextHandle,
        _fhe_type: FheType,
        shares: &[serde_json::Value],
    ) -> Result<u64, PowerLogError> {
        let wanted = handle.to_string();
        let entry = shares
            .iter()
            .find(|share| {
                share
                    .get("handle")
                    .and_then(|h| h.as_str())
                    .is_some_and(|h| h.eq_ignore_ascii_case(&wanted))
            })
            .ok_or_else(|| PowerLogError::fhe(format!("node returned no value for {}", handle)))?;
        entry
            .get("value")
            .and_then(parse_clear_value)
            .ok_or_else(|| PowerLogError::fhe(format!("node returned an unreadable value for {}", handle)))
    }
}

//! FHEVM wire conventions shared by every FHE client
//!
//! Input proofs are the byte string `addRecord` forwards to the input
//! verifier: handle count, signer count, the handles, the coprocessor
//! signatures and finally extra data.

use serde::{Deserialize, Serialize};

use crate::{AccountAddress, CiphertextHandle, PowerLogError};

/// Protocol contract addresses reported by an FHEVM development node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FhevmMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: AccountAddress,
    pub input_verifier_address: AccountAddress,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: AccountAddress,
}

/// Length of one coprocessor signature in an input proof
pub const SIGNATURE_LEN: usize = 65;

pub fn encode_input_proof(handles: &[CiphertextHandle], signatures: &[Vec<u8>], extra_data: &[u8]) -> Vec<u8> {
    let mut proof = Vec::with_capacity(2 + handles.len() * 32 + signatures.len() * SIGNATURE_LEN + extra_data.len());
    proof.push(handles.len() as u8);
    proof.push(signatures.len() as u8);
    for handle in handles {
        proof.extend_from_slice(handle.as_bytes());
    }
    for signature in signatures {
        proof.extend_from_slice(signature);
    }
    proof.extend_from_slice(extra_data);
    proof
}

/// Extract the handles listed in an input proof
pub fn parse_input_proof(proof: &[u8]) -> Result<Vec<CiphertextHandle>, PowerLogError> {
    if proof.len() < 2 {
        return Err(PowerLogError::Transaction("input proof is truncated".to_string()));
    }
    let count = proof[0] as usize;
    let body = &proof[2..];
    if body.len() < count * 32 {
        return Err(PowerLogError::Transaction(format!(
            "input proof lists {} handles but holds {} bytes",
            count,
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(32)
        .take(count)
        .map(|chunk| {
            let mut handle = [0u8; 32];
            handle.copy_from_slice(chunk);
            CiphertextHandle(handle)
        })
        .collect())
}

/// Number of coprocessor signatures an input proof carries
pub fn input_proof_signers(proof: &[u8]) -> usize {
    proof.get(1).copied().unwrap_or(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_proof_layout() {
        let handle = CiphertextHandle([0x42; 32]);
        let proof = encode_input_proof(&[handle], &[vec![0x11; SIGNATURE_LEN]], &[0x00]);
        assert_eq!(proof.len(), 2 + 32 + SIGNATURE_LEN + 1);
        assert_eq!(parse_input_proof(&proof).unwrap(), vec![handle]);
        assert_eq!(input_proof_signers(&proof), 1);
        assert!(parse_input_proof(&[1, 0, 0xff]).is_err());
    }

    #[test]
    fn test_metadata_json_field_names() {
        let json = r#"{
            "ACLAddress": "0x50157cffd6bbfa2dece204a89ec419c23ef5755d",
            "InputVerifierAddress": "0x901f8942346f7ab3a01f6d7613119bca447bb030",
            "KMSVerifierAddress": "0x1364cbbf2cdf5032c47d8226a6f6fbd2afcdacac"
        }"#;
        let metadata: FhevmMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.acl_address.0[0], 0x50);
        assert_eq!(metadata.kms_verifier_address.0[0], 0x13);
    }
}

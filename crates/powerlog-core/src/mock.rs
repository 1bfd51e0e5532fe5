//! In-process FHE stand-in for tests
//!
//! [`MockCoprocessor`] keeps cleartexts keyed by handle together with the
//! access list the contract grants. [`MockFheInstance`] produces handles in
//! the FHEVM layout against it, so the in-memory contract fake can verify
//! inputs and serve decryptions without a node.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use crate::authorization::{unix_now, DecryptionAuthorization, DecryptionKeypair};
use crate::protocol::{encode_input_proof, parse_input_proof, FhevmMetadata};
use crate::traits::FheInstance;
use crate::{AccountAddress, CiphertextHandle, EncryptedInput, FheType, PowerLogError};

/// Handle version written to byte 31
pub const HANDLE_VERSION: u8 = 0;

#[derive(Debug, Clone)]
struct StoredCiphertext {
    value: u64,
    fhe_type: FheType,
    contract: AccountAddress,
    submitter: AccountAddress,
    allowed: HashSet<AccountAddress>,
}

/// In-process stand-in for the coprocessor's ciphertext and ACL state
#[derive(Debug, Default)]
pub struct MockCoprocessor {
    ciphertexts: Mutex<HashMap<CiphertextHandle, StoredCiphertext>>,
    nonce: AtomicU64,
    decrypt_calls: AtomicU64,
}

impl MockCoprocessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(
        &self,
        handle: CiphertextHandle,
        value: u64,
        fhe_type: FheType,
        contract: AccountAddress,
        submitter: AccountAddress,
    ) -> Result<(), PowerLogError> {
        let mut ciphertexts = self
            .ciphertexts
            .lock()
            .map_err(|_| PowerLogError::fhe("mock coprocessor state poisoned"))?;
        ciphertexts.insert(
            handle,
            StoredCiphertext {
                value,
                fhe_type,
                contract,
                submitter,
                allowed: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Check an input proof the way the input verifier contract would
    ///
    /// The proof must list `handle`, and the handle must have been produced
    /// for this contract and submitting account.
    pub fn verify_input(
        &self,
        input: &EncryptedInput,
        contract: AccountAddress,
        submitter: AccountAddress,
    ) -> Result<(), PowerLogError> {
        let handles = parse_input_proof(&input.proof)?;
        if !handles.contains(&input.handle) {
            return Err(PowerLogError::Transaction(
                "input proof does not cover the submitted handle".to_string(),
            ));
        }
        let ciphertexts = self
            .ciphertexts
            .lock()
            .map_err(|_| PowerLogError::fhe("mock coprocessor state poisoned"))?;
        match ciphertexts.get(&input.handle) {
            Some(ct) if ct.contract == contract && ct.submitter == submitter => Ok(()),
            Some(_) => Err(PowerLogError::Transaction(
                "input was encrypted for a different contract or account".to_string(),
            )),
            None => Err(PowerLogError::Transaction(
                "unknown input handle".to_string(),
            )),
        }
    }

    /// Grant `account` access to `handle` (the contract's `FHE.allow`)
    pub fn allow(
        &self,
        handle: &CiphertextHandle,
        account: AccountAddress,
    ) -> Result<(), PowerLogError> {
        let mut ciphertexts = self
            .ciphertexts
            .lock()
            .map_err(|_| PowerLogError::fhe("mock coprocessor state poisoned"))?;
        let ct = ciphertexts
            .get_mut(handle)
            .ok_or_else(|| PowerLogError::fhe(format!("unknown handle {}", handle)))?;
        ct.allowed.insert(account);
        Ok(())
    }

    pub fn is_allowed(&self, handle: &CiphertextHandle, account: &AccountAddress) -> bool {
        self.ciphertexts
            .lock()
            .map(|c| c.get(handle).is_some_and(|ct| ct.allowed.contains(account)))
            .unwrap_or(false)
    }

    /// Number of decryptions served so far
    pub fn decrypt_calls(&self) -> u64 {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    fn decrypt(
        &self,
        handle: &CiphertextHandle,
        fhe_type: FheType,
        user: &AccountAddress,
        contract: &AccountAddress,
    ) -> Result<u64, PowerLogError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        let ciphertexts = self
            .ciphertexts
            .lock()
            .map_err(|_| PowerLogError::fhe("mock coprocessor state poisoned"))?;
        let ct = ciphertexts
            .get(handle)
            .ok_or_else(|| PowerLogError::fhe(format!("unknown handle {}", handle)))?;
        if ct.fhe_type != fhe_type {
            return Err(PowerLogError::fhe(format!(
                "handle {} holds {:?}, not {:?}",
                handle, ct.fhe_type, fhe_type
            )));
        }
        if !ct.allowed.contains(user) {
            return Err(PowerLogError::Authorization(format!(
                "{} is not allowed to decrypt {}",
                user, handle
            )));
        }
        if !ct.allowed.contains(contract) {
            return Err(PowerLogError::Authorization(format!(
                "contract {} is not allowed to use {}",
                contract, handle
            )));
        }
        Ok(ct.value)
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }
}

/// Build an FHEVM-layout handle
///
/// Bytes `0..21` come from a keccak digest of the input, followed by the
/// input index, the big-endian chain id, the type id and the handle version.
pub fn compute_handle(digest: &[u8; 32], index: u8, chain_id: u64, fhe_type: FheType) -> CiphertextHandle {
    let mut handle = [0u8; 32];
    handle[..21].copy_from_slice(&digest[..21]);
    handle[21] = index;
    handle[22..30].copy_from_slice(&chain_id.to_be_bytes());
    handle[30] = fhe_type.type_id();
    handle[31] = HANDLE_VERSION;
    CiphertextHandle(handle)
}

/// FHE client instance backed by a [`MockCoprocessor`]
#[derive(Debug, Clone)]
pub struct MockFheInstance {
    chain_id: u64,
    metadata: FhevmMetadata,
    coprocessor: Arc<MockCoprocessor>,
}

impl MockFheInstance {
    pub fn new(chain_id: u64, metadata: FhevmMetadata, coprocessor: Arc<MockCoprocessor>) -> Self {
        Self {
            chain_id,
            metadata,
            coprocessor,
        }
    }

    pub fn metadata(&self) -> &FhevmMetadata {
        &self.metadata
    }

    pub fn coprocessor(&self) -> &Arc<MockCoprocessor> {
        &self.coprocessor
    }
}

impl FheInstance for MockFheInstance {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn decryption_verifier(&self) -> AccountAddress {
        self.metadata.kms_verifier_address
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

    async fn encrypt_u32(
        &self,
        contract: AccountAddress,
        account: AccountAddress,
        value: u32,
    ) -> Result<EncryptedInput, PowerLogError> {
        let nonce = self.coprocessor.next_nonce();

        let mut keccak = Keccak::v256();
        keccak.update(b"ZK-w_rct");
        keccak.update(contract.as_bytes());
        keccak.update(account.as_bytes());
        keccak.update(&self.chain_id.to_be_bytes());
        keccak.update(self.metadata.acl_address.as_bytes());
        keccak.update(&value.to_be_bytes());
        keccak.update(&nonce.to_be_bytes());
        let mut digest = [0u8; 32];
        keccak.finalize(&mut digest);

        let handle = compute_handle(&digest, 0, self.chain_id, FheType::Euint32);
        self.coprocessor
            .register(handle, value as u64, FheType::Euint32, contract, account)?;
        debug!("Mock-encrypted input {} for {}", handle, contract);

        Ok(EncryptedInput {
            handle,
            proof: encode_input_proof(&[handle], &[], &[0x00]),
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
        self.coprocessor
            .decrypt(&handle, fhe_type, &authorization.user_address, &contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: AccountAddress = AccountAddress([0xc0; 20]);
    const ALICE: AccountAddress = AccountAddress([0xa1; 20]);

    fn instance() -> MockFheInstance {
        MockFheInstance::new(31337, FhevmMetadata::default(), MockCoprocessor::new())
    }

    fn authorization_for(user: AccountAddress) -> DecryptionAuthorization {
        DecryptionAuthorization {
            user_address: user,
            chain_id: 31337,
            contract_addresses: vec![CONTRACT],
            start_timestamp: unix_now(),
            duration_days: 1,
            keypair: DecryptionKeypair {
                public_key: vec![1],
                private_key: vec![2],
            },
            signature: vec![0u8; 65],
        }
    }

    #[tokio::test]
    async fn test_handles_follow_fhevm_layout() {
        let fhe = instance();
        let input = fhe.encrypt_u32(CONTRACT, ALICE, 150).await.unwrap();
        assert!(!input.handle.is_zero());
        assert_eq!(input.handle.chain_id(), 31337);
        assert_eq!(input.handle.fhe_type_id(), FheType::Euint32.type_id());
        assert_eq!(input.handle.as_bytes()[31], HANDLE_VERSION);
        assert_eq!(parse_input_proof(&input.proof).unwrap(), vec![input.handle]);
    }

    #[tokio::test]
    async fn test_same_value_gets_distinct_handles() {
        let fhe = instance();
        let a = fhe.encrypt_u32(CONTRACT, ALICE, 150).await.unwrap();
        let b = fhe.encrypt_u32(CONTRACT, ALICE, 150).await.unwrap();
        assert_ne!(a.handle, b.handle);
    }

    #[tokio::test]
    async fn test_verify_input_binds_contract_and_submitter() {
        let fhe = instance();
        let input = fhe.encrypt_u32(CONTRACT, ALICE, 10).await.unwrap();
        let copro = fhe.coprocessor();
        assert!(copro.verify_input(&input, CONTRACT, ALICE).is_ok());
        assert!(copro.verify_input(&input, CONTRACT, AccountAddress([0xb0; 20])).is_err());
        assert!(copro.verify_input(&input, AccountAddress([0xc1; 20]), ALICE).is_err());
    }

    #[tokio::test]
    async fn test_decrypt_requires_acl() {
        let fhe = instance();
        let input = fhe.encrypt_u32(CONTRACT, ALICE, 42).await.unwrap();
        let auth = authorization_for(ALICE);

        let denied = fhe
            .user_decrypt(FheType::Euint32, input.handle, CONTRACT, &auth)
            .await;
        assert!(matches!(denied, Err(PowerLogError::Authorization(_))));

        fhe.coprocessor().allow(&input.handle, CONTRACT).unwrap();
        fhe.coprocessor().allow(&input.handle, ALICE).unwrap();
        let value = fhe
            .user_decrypt(FheType::Euint32, input.handle, CONTRACT, &auth)
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_decrypt_rejects_wrong_contract_scope() {
        let fhe = instance();
        let input = fhe.encrypt_u32(CONTRACT, ALICE, 42).await.unwrap();
        fhe.coprocessor().allow(&input.handle, CONTRACT).unwrap();
        fhe.coprocessor().allow(&input.handle, ALICE).unwrap();
        let mut auth = authorization_for(ALICE);
        auth.contract_addresses = vec![AccountAddress([0xdd; 20])];
        let result = fhe
            .user_decrypt(FheType::Euint32, input.handle, CONTRACT, &auth)
            .await;
        assert!(matches!(result, Err(PowerLogError::Authorization(_))));
    }
}

//! Signed user-decryption authorizations and their storage
//!
//! Decrypting a handle requires an EIP-712 signature from the reading account,
//! scoped to a set of contracts on one chain and valid for a number of days.
//! Signing may prompt the wallet, so signed authorizations are kept in a
//! [`SignatureStorage`] and reused until they expire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::traits::{AuthorizationSigner, FheInstance};
use crate::{AccountAddress, PowerLogError};

/// Validity window of a freshly signed authorization
pub const DEFAULT_DURATION_DAYS: u64 = 365;

const SECONDS_PER_DAY: u64 = 86_400;

/// Ephemeral keypair the decryption service re-encrypts results for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionKeypair {
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex")]
    pub private_key: Vec<u8>,
}

/// The typed-data message a wallet signs to authorize user decryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    /// EIP-712 domain chain id
    pub chain_id: u64,
    /// EIP-712 domain verifying contract
    pub verifying_contract: AccountAddress,
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    pub contract_addresses: Vec<AccountAddress>,
    pub start_timestamp: u64,
    pub duration_days: u64,
    #[serde(with = "hex")]
    pub extra_data: Vec<u8>,
}

/// A signed authorization plus the keypair it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionAuthorization {
    pub user_address: AccountAddress,
    pub chain_id: u64,
    pub contract_addresses: Vec<AccountAddress>,
    pub start_timestamp: u64,
    pub duration_days: u64,
    pub keypair: DecryptionKeypair,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl DecryptionAuthorization {
    /// Seconds since the epoch after which the authorization is no longer accepted
    pub fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(self.duration_days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        now >= self.start_timestamp && now < self.expires_at()
    }

    pub fn covers(&self, contract: &AccountAddress) -> bool {
        self.contract_addresses.contains(contract)
    }

    /// Storage key for a (chain, user, contract set) scope
    pub fn storage_key(
        chain_id: u64,
        user: &AccountAddress,
        contracts: &[AccountAddress],
    ) -> String {
        let mut sorted = contracts.to_vec();
        sorted.sort();
        sorted.dedup();
        let contracts: Vec<String> = sorted.iter().map(|c| c.to_string()).collect();
        format!("{}:{}:{}", chain_id, user, contracts.join(","))
    }

    /// Load a still-valid authorization for this scope, or sign a new one
    ///
    /// A fresh authorization is persisted to `storage` before it is returned.
    pub async fn load_or_sign<I, S>(
        instance: &I,
        contracts: &[AccountAddress],
        signer: &S,
        storage: &dyn SignatureStorage,
    ) -> Result<Self, PowerLogError>
    where
        I: FheInstance,
        S: AuthorizationSigner,
    {
        let user = signer.address();
        let chain_id = instance.chain_id();
        let key = Self::storage_key(chain_id, &user, contracts);
        let now = unix_now();

        if let Some(cached) = storage.get(&key) {
            if cached.is_valid_at(now) && cached.user_address == user {
                debug!("Reusing decryption authorization for {}", key);
                return Ok(cached);
            }
            debug!("Stored decryption authorization for {} expired", key);
            storage.remove(&key);
        }

        let keypair = instance.generate_keypair()?;
        let mut contract_addresses = contracts.to_vec();
        contract_addresses.sort();
        contract_addresses.dedup();

        let request = DecryptionRequest {
            chain_id,
            verifying_contract: instance.decryption_verifier(),
            public_key: keypair.public_key.clone(),
            contract_addresses: contract_addresses.clone(),
            start_timestamp: now,
            duration_days: DEFAULT_DURATION_DAYS,
            extra_data: vec![0x00],
        };

        info!("Requesting decryption signature from {}", user);
        let signature = signer.sign_decryption_request(&request).await?;
        if signature.is_empty() {
            return Err(PowerLogError::Authorization(
                "wallet returned an empty signature".to_string(),
            ));
        }

        let authorization = Self {
            user_address: user,
            chain_id,
            contract_addresses,
            start_timestamp: now,
            duration_days: DEFAULT_DURATION_DAYS,
            keypair,
            signature,
        };
        storage.set(&key, authorization.clone());
        Ok(authorization)
    }
}

/// Persistence for signed decryption authorizations
pub trait SignatureStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<DecryptionAuthorization>;
    fn set(&self, key: &str, authorization: DecryptionAuthorization);
    fn remove(&self, key: &str);
}

/// Process-local signature storage, forgotten when the session ends
#[derive(Debug, Default)]
pub struct InMemorySignatureStorage {
    entries: Mutex<HashMap<String, DecryptionAuthorization>>,
}

impl InMemorySignatureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignatureStorage for InMemorySignatureStorage {
    fn get(&self, key: &str) -> Option<DecryptionAuthorization> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, authorization: DecryptionAuthorization) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), authorization);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Seconds since the Unix epoch; zero if the clock is before it
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorization(start: u64, days: u64) -> DecryptionAuthorization {
        DecryptionAuthorization {
            user_address: AccountAddress([1u8; 20]),
            chain_id: 31337,
            contract_addresses: vec![AccountAddress([2u8; 20])],
            start_timestamp: start,
            duration_days: days,
            keypair: DecryptionKeypair {
                public_key: vec![1],
                private_key: vec![2],
            },
            signature: vec![3; 65],
        }
    }

    #[test]
    fn test_validity_window() {
        let auth = authorization(1_000, 1);
        assert!(!auth.is_valid_at(999));
        assert!(auth.is_valid_at(1_000));
        assert!(auth.is_valid_at(1_000 + SECONDS_PER_DAY - 1));
        assert!(!auth.is_valid_at(1_000 + SECONDS_PER_DAY));
    }

    #[test]
    fn test_storage_key_ignores_contract_order() {
        let user = AccountAddress([9u8; 20]);
        let a = AccountAddress([1u8; 20]);
        let b = AccountAddress([2u8; 20]);
        assert_eq!(
            DecryptionAuthorization::storage_key(1, &user, &[a, b]),
            DecryptionAuthorization::storage_key(1, &user, &[b, a, b]),
        );
        assert_ne!(
            DecryptionAuthorization::storage_key(1, &user, &[a]),
            DecryptionAuthorization::storage_key(2, &user, &[a]),
        );
    }

    #[test]
    fn test_in_memory_storage() {
        let storage = InMemorySignatureStorage::new();
        assert!(storage.is_empty());
        storage.set("k", authorization(0, 1));
        assert_eq!(storage.get("k").unwrap().chain_id, 31337);
        storage.remove("k");
        assert!(storage.get("k").is_none());
    }
}

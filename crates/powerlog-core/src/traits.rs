//! Trait definitions for powerlog-core
//!
//! The orchestrator talks to three external systems: the deployed
//! `PowerUsage` contract, an FHE client instance, and a wallet able to sign
//! decryption authorizations. Each is a trait so that the alloy-backed
//! implementations in `powerlog-ethereum` and the in-memory fakes used by tests
//! are interchangeable.

use serde::{Deserialize, Serialize};

use crate::authorization::{DecryptionAuthorization, DecryptionKeypair, DecryptionRequest};
use crate::{
    AccountAddress, CiphertextHandle, EncryptedInput, FheType, PowerLogError, RecordId,
    RecordMetadata,
};

/// Outcome of a confirmed `addRecord` transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRecord {
    /// Transaction hash, hex encoded with 0x prefix
    pub tx_hash: String,
    /// Block the transaction was included in, when known
    pub block_number: Option<u64>,
    /// Id assigned by the contract, when it could be recovered
    pub record_id: Option<RecordId>,
}

/// Read/write access to the deployed `PowerUsage` contract
///
/// Write calls resolve only once the transaction is confirmed; a reverted
/// transaction is reported as [`PowerLogError::Transaction`].
#[allow(async_fn_in_trait)]
pub trait RecordContract {
    /// Address the contract is deployed at
    fn address(&self) -> AccountAddress;

    /// Store an encrypted reading for the calling account
    async fn add_record(
        &self,
        input: &EncryptedInput,
        period: u32,
    ) -> Result<SubmittedRecord, PowerLogError>;

    /// Number of records across all users
    async fn total_records(&self) -> Result<u64, PowerLogError>;

    /// Number of records owned by `user`
    async fn user_record_count(&self, user: AccountAddress) -> Result<u64, PowerLogError>;

    /// Id of the `index`-th record owned by `user`
    async fn user_record_by_index(
        &self,
        user: AccountAddress,
        index: u64,
    ) -> Result<RecordId, PowerLogError>;

    /// Owner, timestamp and period of a record
    async fn record_metadata(&self, id: RecordId) -> Result<RecordMetadata, PowerLogError>;

    /// Ciphertext handle of a record's usage; zero when uninitialized
    async fn record_usage(&self, id: RecordId) -> Result<CiphertextHandle, PowerLogError>;

    /// Whether a record with this id was ever created
    async fn record_exists(&self, id: RecordId) -> Result<bool, PowerLogError>;
}

/// An initialized FHE client bound to one chain
#[allow(async_fn_in_trait)]
pub trait FheInstance {
    /// Chain the instance was created for
    fn chain_id(&self) -> u64;

    /// Contract that verifies user-decryption signatures (EIP-712 verifying contract)
    fn decryption_verifier(&self) -> AccountAddress;

    /// Generate the ephemeral keypair a decryption authorization is bound to
    fn generate_keypair(&self) -> Result<DecryptionKeypair, PowerLogError>;

    /// Encrypt a 32-bit value for `contract`, to be submitted by `account`
    async fn encrypt_u32(
        &self,
        contract: AccountAddress,
        account: AccountAddress,
        value: u32,
    ) -> Result<EncryptedInput, PowerLogError>;

    /// Decrypt a handle the authorization's user is allowed to read
    async fn user_decrypt(
        &self,
        fhe_type: FheType,
        handle: CiphertextHandle,
        contract: AccountAddress,
        authorization: &DecryptionAuthorization,
    ) -> Result<u64, PowerLogError>;
}

/// Wallet capable of signing user-decryption requests
#[allow(async_fn_in_trait)]
pub trait AuthorizationSigner {
    /// Address of the signing account
    fn address(&self) -> AccountAddress;

    /// Sign the EIP-712 `UserDecryptRequestVerification` message
    ///
    /// Interactive wallets may prompt the user here; a refusal is reported
    /// as [`PowerLogError::Authorization`].
    async fn sign_decryption_request(
        &self,
        request: &DecryptionRequest,
    ) -> Result<Vec<u8>, PowerLogError>;
}

impl<T: RecordContract> RecordContract for &T {
    fn address(&self) -> AccountAddress {
        (**self).address()
    }

    async fn add_record(
        &self,
        input: &EncryptedInput,
        period: u32,
    ) -> Result<SubmittedRecord, PowerLogError> {
        (**self).add_record(input, period).await
    }

    async fn total_records(&self) -> Result<u64, PowerLogError> {
        (**self).total_records().await
    }

    async fn user_record_count(&self, user: AccountAddress) -> Result<u64, PowerLogError> {
        (**self).user_record_count(user).await
    }

    async fn user_record_by_index(
        &self,
        user: AccountAddress,
        index: u64,
    ) -> Result<RecordId, PowerLogError> {
        (**self).user_record_by_index(user, index).await
    }

    async fn record_metadata(&self, id: RecordId) -> Result<RecordMetadata, PowerLogError> {
        (**self).record_metadata(id).await
    }

    async fn record_usage(&self, id: RecordId) -> Result<CiphertextHandle, PowerLogError> {
        (**self).record_usage(id).await
    }

    async fn record_exists(&self, id: RecordId) -> Result<bool, PowerLogError> {
        (**self).record_exists(id).await
    }
}

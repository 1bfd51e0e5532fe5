//! In-memory contract and wallet fakes
//!
//! [`InMemoryRecordContract`] keeps records the way the `PowerUsage` contract
//! does: ids start at 1, each user has an index of their own ids, and every
//! stored handle is granted to the contract and its owner on the shared
//! [`MockCoprocessor`]. Writes and signatures can be held open with a
//! [`Notify`] gate to exercise in-flight behaviour.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::authorization::DecryptionRequest;
use crate::mock::MockCoprocessor;
use crate::traits::{AuthorizationSigner, RecordContract, SubmittedRecord};
use crate::{
    AccountAddress, CiphertextHandle, EncryptedInput, PowerLogError, RecordId, RecordMetadata,
};

/// Block timestamp of the first record written by the fake
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Default)]
struct Ledger {
    records: BTreeMap<RecordId, (RecordMetadata, CiphertextHandle)>,
    by_user: HashMap<AccountAddress, Vec<RecordId>>,
    blocks: u64,
}

/// Contract fake that submits as a single caller
#[derive(Debug)]
pub struct InMemoryRecordContract {
    address: AccountAddress,
    caller: AccountAddress,
    coprocessor: Arc<MockCoprocessor>,
    ledger: Arc<Mutex<Ledger>>,
    write_gate: Option<Arc<Notify>>,
    reported_count: Option<u64>,
    reads: AtomicUsize,
}

impl InMemoryRecordContract {
    pub fn new(address: AccountAddress, caller: AccountAddress, coprocessor: Arc<MockCoprocessor>) -> Self {
        Self {
            address,
            caller,
            coprocessor,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            write_gate: None,
            reported_count: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Hold every `add_record` until the gate is notified
    pub fn with_write_gate(mut self, gate: Arc<Notify>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    /// Answer `user_record_count` with `count` regardless of the ledger
    pub fn with_reported_count(mut self, count: u64) -> Self {
        self.reported_count = Some(count);
        self
    }

    /// Shares this ledger, submitting as another account
    pub fn as_caller(&self, caller: AccountAddress) -> InMemoryRecordContract {
        InMemoryRecordContract {
            address: self.address,
            caller,
            coprocessor: Arc::clone(&self.coprocessor),
            ledger: Arc::clone(&self.ledger),
            write_gate: None,
            reported_count: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Store a record directly, bypassing input verification
    pub fn insert_raw(&self, owner: AccountAddress, period: u32, handle: CiphertextHandle) -> RecordId {
        let mut ledger = self.lock();
        ledger.blocks += 1;
        let id = RecordId(ledger.records.len() as u64 + 1);
        let metadata = RecordMetadata {
            owner,
            timestamp: GENESIS_TIMESTAMP + ledger.blocks * 12,
            period,
        };
        ledger.records.insert(id, (metadata, handle));
        ledger.by_user.entry(owner).or_default().push(id);
        id
    }

    /// Number of view calls served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, id: RecordId) -> Result<(RecordMetadata, CiphertextHandle), PowerLogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .records
            .get(&id)
            .copied()
            .ok_or_else(|| PowerLogError::Transaction("Record does not exist".to_string()))
    }
}

impl RecordContract for InMemoryRecordContract {
    fn address(&self) -> AccountAddress {
        self.address
    }

    async fn add_record(
        &self,
        input: &EncryptedInput,
        period: u32,
    ) -> Result<SubmittedRecord, PowerLogError> {
        if let Some(gate) = &self.write_gate {
            gate.notified().await;
        }
        self.coprocessor.verify_input(input, self.address, self.caller)?;
        self.coprocessor.allow(&input.handle, self.address)?;
        self.coprocessor.allow(&input.handle, self.caller)?;

        let id = self.insert_raw(self.caller, period, input.handle);
        let block = self.lock().blocks;
        Ok(SubmittedRecord {
            tx_hash: format!("0x{:064x}", block),
            block_number: Some(block),
            record_id: Some(id),
        })
    }

    async fn total_records(&self) -> Result<u64, PowerLogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().records.len() as u64)
    }

    async fn user_record_count(&self, user: AccountAddress) -> Result<u64, PowerLogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(count) = self.reported_count {
            return Ok(count);
        }
        Ok(self.lock().by_user.get(&user).map_or(0, |ids| ids.len() as u64))
    }

    async fn user_record_by_index(
        &self,
        user: AccountAddress,
        index: u64,
    ) -> Result<RecordId, PowerLogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .by_user
            .get(&user)
            .and_then(|ids| ids.get(index as usize).copied())
            .ok_or_else(|| PowerLogError::Transaction("Index out of bounds".to_string()))
    }

    async fn record_metadata(&self, id: RecordId) -> Result<RecordMetadata, PowerLogError> {
        self.record(id).map(|(metadata, _)| metadata)
    }

    async fn record_usage(&self, id: RecordId) -> Result<CiphertextHandle, PowerLogError> {
        self.record(id).map(|(_, handle)| handle)
    }

    async fn record_exists(&self, id: RecordId) -> Result<bool, PowerLogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().records.contains_key(&id))
    }
}

/// Signer that produces a deterministic dummy signature
#[derive(Debug, Default)]
pub struct TestSigner {
    address: AccountAddress,
    refuse: bool,
    gate: Option<Arc<Notify>>,
    signatures: AtomicUsize,
}

impl TestSigner {
    pub fn new(address: AccountAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// A signer whose user rejects every signature prompt
    pub fn refusing(address: AccountAddress) -> Self {
        Self {
            address,
            refuse: true,
            ..Self::default()
        }
    }

    /// Hold every signature until the gate is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of signatures produced
    pub fn signatures(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

impl AuthorizationSigner for TestSigner {
    fn address(&self) -> AccountAddress {
        self.address
    }

    async fn sign_decryption_request(
        &self,
        request: &DecryptionRequest,
    ) -> Result<Vec<u8>, PowerLogError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.refuse {
            return Err(PowerLogError::Authorization(
                "user rejected the signature request".to_string(),
            ));
        }
        self.signatures.fetch_add(1, Ordering::SeqCst);
        let mut signature = vec![0u8; 65];
        signature[..20].copy_from_slice(self.address.as_bytes());
        signature[20..28].copy_from_slice(&request.start_timestamp.to_be_bytes());
        signature[64] = 27;
        Ok(signature)
    }
}

//! Record orchestration: submit, load and decrypt power-usage records
//!
//! A [`RecordOrchestrator`] lives for one wallet session on one chain. Its
//! [`SessionContext`] is derived from the wallet's `(rpc endpoint, chain id)`
//! key; when either changes the host builds a new context and a new
//! orchestrator rather than mutating this one.
//!
//! Submission and decryption each have a single in-flight slot. A call that
//! finds its slot taken is dropped (not queued) and reports `Skipped`. Record
//! loading has no slot: overlapping loads race and the last one to finish
//! wins.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::authorization::{DecryptionAuthorization, SignatureStorage};
use crate::fhe::FheStatus;
use crate::input::UsageReading;
use crate::record::{DecryptStatus, DeploymentStatus, Record, RecordId};
use crate::traits::{AuthorizationSigner, FheInstance, RecordContract, SubmittedRecord};
use crate::{AccountAddress, FheType, PowerLogError};

/// Everything an orchestrator needs from the wallet, chain and FHE layers
pub struct SessionContext<C, I, S> {
    /// Connected account, if any
    pub account: Option<AccountAddress>,
    pub chain_id: Option<u64>,
    /// Contract binding; `None` unless deployed on `chain_id`
    pub contract: Option<C>,
    pub deployment: DeploymentStatus,
    /// Write-capable signer, present only when a wallet is connected
    pub signer: Option<S>,
    pub fhe: watch::Receiver<FheStatus<I>>,
    pub signature_storage: Arc<dyn SignatureStorage>,
}

/// Result of a submission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SubmitOutcome {
    Submitted(SubmittedRecord),
    /// Another submission was already in flight
    Skipped,
}

/// Result of a decryption request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "value")]
pub enum DecryptOutcome {
    Decrypted(u32),
    /// Another decryption was already in flight
    Skipped,
}

/// Snapshot of the orchestrator's session state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub records: Vec<Record>,
    pub is_submitting: bool,
    /// Record currently being decrypted
    pub decrypting: Option<RecordId>,
    pub is_loading: bool,
    pub message: Option<String>,
    #[serde(skip)]
    pending_loads: usize,
    #[serde(skip)]
    records_epoch: u64,
}

impl SessionState {
    pub fn decrypt_status(&self, record: &Record) -> DecryptStatus {
        match record.decrypted_value {
            Some(value) => DecryptStatus::Decrypted(value),
            None if self.decrypting == Some(record.record_id) => DecryptStatus::Decrypting,
            None => DecryptStatus::Encrypted,
        }
    }
}

/// Coordinates encryption, submission, loading and decryption of records
pub struct RecordOrchestrator<C, I, S> {
    ctx: SessionContext<C, I, S>,
    state: Mutex<SessionState>,
}

impl<C, I, S> RecordOrchestrator<C, I, S>
where
    C: RecordContract,
    I: FheInstance,
    S: AuthorizationSigner,
{
    pub fn new(ctx: SessionContext<C, I, S>) -> Self {
        Self {
            ctx,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn context(&self) -> &SessionContext<C, I, S> {
        &self.ctx
    }

    /// Contract binding for direct reads, when deployed
    pub fn contract(&self) -> Option<&C> {
        self.ctx.contract.as_ref()
    }

    pub fn is_deployed(&self) -> DeploymentStatus {
        self.ctx.deployment
    }

    pub fn fhe_status(&self) -> FheStatus<I> {
        self.ctx.fhe.borrow().clone()
    }

    /// FHE ready, wallet connected with a signer, and contract deployed
    pub fn can_submit(&self) -> bool {
        self.ctx.fhe.borrow().is_ready()
            && self.ctx.signer.is_some()
            && self.ctx.deployment.is_deployed()
            && self.ctx.contract.is_some()
    }

    /// Wallet connected and contract deployed; reads do not need the FHE client
    pub fn can_load_records(&self) -> bool {
        self.ctx.account.is_some()
            && self.ctx.deployment.is_deployed()
            && self.ctx.contract.is_some()
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock_state().clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock_state().records.clone()
    }

    pub fn message(&self) -> Option<String> {
        self.lock_state().message.clone()
    }

    pub fn is_submitting(&self) -> bool {
        self.lock_state().is_submitting
    }

    pub fn is_decrypting(&self) -> Option<RecordId> {
        self.lock_state().decrypting
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().is_loading
    }

    /// Encrypt a reading, store it on-chain, then reload the record list
    ///
    /// At most one submission runs at a time; a call made while another is in
    /// flight returns [`SubmitOutcome::Skipped`] without sending anything.
    pub async fn submit_record(
        &self,
        value: f64,
        period: Option<i64>,
    ) -> Result<SubmitOutcome, PowerLogError> {
        let reading = UsageReading::new(value, period).map_err(|e| self.fail(e))?;
        let (contract, signer, instance) = self.write_preconditions().map_err(|e| self.fail(e))?;

        {
            let mut state = self.lock_state();
            if state.is_submitting {
                debug!("Submission already in flight, dropping request");
                return Ok(SubmitOutcome::Skipped);
            }
            state.is_submitting = true;
            state.message = Some(format!(
                "Encrypting {} kWh for period {}...",
                reading.kwh, reading.period
            ));
        }

        let result = self
            .send_reading(contract, signer.address(), &instance, reading)
            .await;

        {
            let mut state = self.lock_state();
            state.is_submitting = false;
            state.message = Some(match &result {
                Ok(submitted) => format!("Record submitted in tx {}", submitted.tx_hash),
                Err(err) => err.to_string(),
            });
        }
        let submitted = result?;

        if let Err(err) = self.load_user_records().await {
            warn!("Reload after submission failed: {}", err);
        }
        Ok(SubmitOutcome::Submitted(submitted))
    }

    async fn send_reading(
        &self,
        contract: &C,
        account: AccountAddress,
        instance: &I,
        reading: UsageReading,
    ) -> Result<SubmittedRecord, PowerLogError> {
        let input = instance
            .encrypt_u32(contract.address(), account, reading.kwh)
            .await?;
        debug!("Encrypted reading as handle {}", input.handle);

        self.set_message(format!("Submitting record for period {}...", reading.period));
        let submitted = contract.add_record(&input, reading.period).await?;
        info!(
            "addRecord confirmed: tx={} block={:?}",
            submitted.tx_hash, submitted.block_number
        );
        Ok(submitted)
    }

    /// Replace the record list with the connected account's records
    ///
    /// Any decrypted values are dropped. Returns the number of records read.
    pub async fn load_user_records(&self) -> Result<usize, PowerLogError> {
        if !self.can_load_records() {
            return Err(self.fail(self.load_blocker()));
        }
        let (Some(contract), Some(account)) = (self.ctx.contract.as_ref(), self.ctx.account)
        else {
            return Err(self.fail(self.load_blocker()));
        };

        {
            let mut state = self.lock_state();
            state.pending_loads += 1;
            state.is_loading = true;
        }

        let result = fetch_records(contract, account).await;

        let mut state = self.lock_state();
        state.pending_loads = state.pending_loads.saturating_sub(1);
        state.is_loading = state.pending_loads > 0;
        match result {
            Ok(records) => {
                let count = records.len();
                state.records = records;
                state.records_epoch += 1;
                debug!("Loaded {} records for {}", count, account);
                Ok(count)
            }
            Err(err) => {
                state.message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Decrypt one record's usage for its owner
    ///
    /// At most one decryption runs at a time. The result is attached to the
    /// record with the requested id, and only if the list has not been
    /// reloaded since the request started.
    pub async fn decrypt_record(&self, record_id: RecordId) -> Result<DecryptOutcome, PowerLogError> {
        let (contract, signer, instance) = self.write_preconditions().map_err(|e| self.fail(e))?;

        let epoch = {
            let mut state = self.lock_state();
            if let Some(in_flight) = state.decrypting {
                debug!(
                    "Decryption of record #{} in flight, dropping request for #{}",
                    in_flight, record_id
                );
                return Ok(DecryptOutcome::Skipped);
            }
            state.decrypting = Some(record_id);
            state.message = Some(format!("Decrypting record #{}...", record_id));
            state.records_epoch
        };

        let result = self.decrypt_usage(contract, signer, &instance, record_id).await;

        let mut state = self.lock_state();
        state.decrypting = None;
        match result {
            Ok(value) => {
                if state.records_epoch == epoch {
                    if let Some(record) = state.records.iter_mut().find(|r| r.record_id == record_id) {
                        record.decrypted_value = Some(value);
                    }
                } else {
                    debug!("Record list reloaded during decryption of #{}", record_id);
                }
                state.message = Some(format!("Record #{} decrypted", record_id));
                Ok(DecryptOutcome::Decrypted(value))
            }
            Err(err) => {
                state.message = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn decrypt_usage(
        &self,
        contract: &C,
        signer: &S,
        instance: &I,
        record_id: RecordId,
    ) -> Result<u32, PowerLogError> {
        let handle = contract.record_usage(record_id).await?;
        if handle.is_zero() {
            return Err(PowerLogError::UninitializedHandle(record_id));
        }

        let contract_address = contract.address();
        let authorization = DecryptionAuthorization::load_or_sign(
            instance,
            &[contract_address],
            signer,
            self.ctx.signature_storage.as_ref(),
        )
        .await?;

        let clear = instance
            .user_decrypt(FheType::Euint32, handle, contract_address, &authorization)
            .await?;
        u32::try_from(clear).map_err(|_| {
            PowerLogError::fhe(format!("decrypted value {} exceeds euint32", clear))
        })
    }

    fn write_preconditions(&self) -> Result<(&C, &S, Arc<I>), PowerLogError> {
        if !self.ctx.deployment.is_deployed() {
            return Err(self.not_deployed());
        }
        let contract = self
            .ctx
            .contract
            .as_ref()
            .ok_or_else(|| self.not_deployed())?;
        let signer = self
            .ctx
            .signer
            .as_ref()
            .ok_or_else(|| PowerLogError::precondition("wallet not connected"))?;
        let instance = match &*self.ctx.fhe.borrow() {
            FheStatus::Ready(instance) => Arc::clone(instance),
            FheStatus::Error(cause) => {
                return Err(PowerLogError::precondition(format!(
                    "FHE client unavailable: {}",
                    cause
                )))
            }
            FheStatus::Loading => {
                return Err(PowerLogError::precondition("FHE client is still initializing"))
            }
            FheStatus::Idle => {
                return Err(PowerLogError::precondition("FHE client not initialized"))
            }
        };
        Ok((contract, signer, instance))
    }

    fn load_blocker(&self) -> PowerLogError {
        if self.ctx.account.is_none() {
            PowerLogError::precondition("wallet not connected")
        } else {
            self.not_deployed()
        }
    }

    fn not_deployed(&self) -> PowerLogError {
        match self.ctx.chain_id {
            Some(chain_id) => PowerLogError::precondition(format!(
                "PowerUsage is not deployed on chain {}",
                chain_id
            )),
            None => PowerLogError::precondition("no chain selected"),
        }
    }

    fn fail(&self, err: PowerLogError) -> PowerLogError {
        self.set_message(err.to_string());
        err
    }

    fn set_message(&self, message: String) {
        self.lock_state().message = Some(message);
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // The lock is never held across an await, so a poisoned guard still
        // holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const MAX_PREALLOCATED_RECORDS: u64 = 1024;

async fn fetch_records<C: RecordContract>(
    contract: &C,
    account: AccountAddress,
) -> Result<Vec<Record>, PowerLogError> {
    let count = contract.user_record_count(account).await?;
    // The count is contract-reported; bound the up-front allocation
    let mut records = Vec::with_capacity(count.min(MAX_PREALLOCATED_RECORDS) as usize);
    for index in 0..count {
        let record_id = contract.user_record_by_index(account, index).await?;
        let metadata = contract.record_metadata(record_id).await?;
        let usage = contract.record_usage(record_id).await?;
        records.push(Record::new(record_id, metadata, usage));
    }
    Ok(records)
}

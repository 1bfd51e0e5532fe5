//! `PowerUsage` contract binding over alloy
//!
//! Every call maps one-to-one to a contract entry point. `add_record` sends
//! the transaction through the provider's wallet and waits for the receipt.

use alloy::primitives::{Address, U256};
use alloy::providers::DynProvider;
use powerlog_core::{
    AccountAddress, CiphertextHandle, EncryptedInput, PowerLogError, RecordContract, RecordId,
    RecordMetadata, SubmittedRecord,
};
use tracing::{debug, info, warn};

use crate::bindings::{
    from_address, from_b256, to_address, to_b256, u256_to_u64, EthereumError, PowerUsage,
};

/// Typed binding of a deployed `PowerUsage` contract
#[derive(Clone)]
pub struct AlloyRecordContract {
    contract: PowerUsage::PowerUsageInstance<DynProvider>,
    /// Account writes are sent from, if the provider has a wallet
    sender: Option<Address>,
}

impl AlloyRecordContract {
    pub fn new(address: AccountAddress, provider: DynProvider, sender: Option<AccountAddress>) -> Self {
        Self {
            contract: PowerUsage::new(to_address(address), provider),
            sender: sender.map(to_address),
        }
    }

    /// Id of the caller's most recent record, read after a confirmed write
    async fn latest_record_of(&self, sender: Address) -> Result<RecordId, EthereumError> {
        let count = self.contract.getUserRecordCount(sender).call().await?;
        let count = u256_to_u64(count, "record count")?;
        let index = count
            .checked_sub(1)
            .ok_or_else(|| EthereumError::Rpc("sender has no records".to_string()))?;
        let id = self
            .contract
            .getUserRecordByIndex(sender, U256::from(index))
            .call()
            .await?;
        Ok(RecordId(u256_to_u64(id, "record id")?))
    }
}

impl std::fmt::Debug for AlloyRecordContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyRecordContract")
            .field("address", self.contract.address())
            .field("sender", &self.sender)
            .finish()
    }
}

impl RecordContract for AlloyRecordContract {
    fn address(&self) -> AccountAddress {
        from_address(*self.contract.address())
    }

    async fn add_record(
        &self,
        input: &EncryptedInput,
        period: u32,
    ) -> Result<SubmittedRecord, PowerLogError> {
        let sender = self
            .sender
            .ok_or_else(|| PowerLogError::precondition("wallet not connected"))?;

        let call = self
            .contract
            .addRecord(to_b256(input.handle), input.proof.clone().into(), period)
            .from(sender);
        let pending = call.send().await.map_err(EthereumError::from)?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        debug!("addRecord sent: {}", tx_hash);

        let receipt = pending.get_receipt().await.map_err(EthereumError::from)?;
        if !receipt.status() {
            return Err(EthereumError::Reverted(tx_hash).into());
        }
        info!("addRecord {} mined in block {:?}", tx_hash, receipt.block_number);

        let record_id = match self.latest_record_of(sender).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("Could not read back the new record id: {}", err);
                None
            }
        };

        Ok(SubmittedRecord {
            tx_hash,
            block_number: receipt.block_number,
            record_id,
        })
    }

    async fn total_records(&self) -> Result<u64, PowerLogError> {
        let total = self
            .contract
            .getTotalRecords()
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(u256_to_u64(total, "total records")?)
    }

    async fn user_record_count(&self, user: AccountAddress) -> Result<u64, PowerLogError> {
        let count = self
            .contract
            .getUserRecordCount(to_address(user))
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(u256_to_u64(count, "record count")?)
    }

    async fn user_record_by_index(
        &self,
        user: AccountAddress,
        index: u64,
    ) -> Result<RecordId, PowerLogError> {
        let id = self
            .contract
            .getUserRecordByIndex(to_address(user), U256::from(index))
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(RecordId(u256_to_u64(id, "record id")?))
    }

    async fn record_metadata(&self, id: RecordId) -> Result<RecordMetadata, PowerLogError> {
        let metadata = self
            .contract
            .getRecordMetadata(U256::from(id.0))
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(RecordMetadata {
            owner: from_address(metadata.owner),
            timestamp: u256_to_u64(metadata.timestamp, "timestamp")?,
            period: metadata.period,
        })
    }

    async fn record_usage(&self, id: RecordId) -> Result<CiphertextHandle, PowerLogError> {
        let handle = self
            .contract
            .getRecordUsage(U256::from(id.0))
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(from_b256(handle))
    }

    async fn record_exists(&self, id: RecordId) -> Result<bool, PowerLogError> {
        let exists = self
            .contract
            .recordExists(U256::from(id.0))
            .call()
            .await
            .map_err(EthereumError::from)?;
        Ok(exists)
    }
}

//! Power-usage records as read back from the contract

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{AccountAddress, CiphertextHandle};

/// Contract-assigned record identifier, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId(id)
    }
}

/// Owner, timestamp and period of a record, as returned by `getRecordMetadata`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub owner: AccountAddress,
    /// Seconds since the Unix epoch, set by the contract
    pub timestamp: u64,
    pub period: u32,
}

/// A single power-usage record
///
/// `decrypted_value` only exists in local session state. It is never written
/// back on-chain and is discarded whenever the record list is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: RecordId,
    pub owner: AccountAddress,
    pub period: u32,
    pub timestamp: u64,
    pub encrypted_usage: CiphertextHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrypted_value: Option<u32>,
}

impl Record {
    pub fn new(record_id: RecordId, metadata: RecordMetadata, encrypted_usage: CiphertextHandle) -> Self {
        Self {
            record_id,
            owner: metadata.owner,
            period: metadata.period,
            timestamp: metadata.timestamp,
            encrypted_usage,
            decrypted_value: None,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        self.decrypted_value.is_some()
    }
}

/// Per-record decryption lifecycle as seen by the presentation layer
///
/// `Encrypted -> Decrypting -> Decrypted`, falling back to `Encrypted` on
/// failure. `Decrypted` holds until the next full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum DecryptStatus {
    Encrypted,
    Decrypting,
    Decrypted(u32),
}

/// Whether the contract binding has an address for the active chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// No chain selected yet
    #[default]
    Unknown,
    Deployed,
    NotDeployed,
}

impl DeploymentStatus {
    pub fn is_deployed(self) -> bool {
        self == DeploymentStatus::Deployed
    }
}

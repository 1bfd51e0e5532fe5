//! Error types for powerlog-core
//!
//! This module defines the errors that can surface while encrypting, submitting,
//! loading and decrypting power-usage records.

use crate::record::RecordId;

/// Errors that can occur while orchestrating encrypted power-usage records
///
/// The variants follow the failure taxonomy of the client: validation failures
/// are raised before any network traffic, precondition failures mean an
/// operation was not attempted, and the remaining variants wrap failures of the
/// external services (chain, wallet, FHE coprocessor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerLogError {
    /// User input was rejected before any network call
    InvalidInput(String),
    /// The operation cannot run in the current session state
    Precondition(String),
    /// RPC or HTTP transport failure
    Transport(String),
    /// The transaction was rejected by the wallet or reverted on-chain
    Transaction(String),
    /// The decryption authorization could not be produced or was refused
    Authorization(String),
    /// The record's usage handle is the all-zero sentinel
    UninitializedHandle(RecordId),
    /// The FHE client failed to initialize, encrypt or decrypt
    Fhe(String),
    /// Invalid or missing configuration
    Configuration(String),
    /// Serialization error with error details
    Serialization(String),
}

impl PowerLogError {
    /// Construct an input validation error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PowerLogError::InvalidInput(msg.into())
    }

    /// Construct a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        PowerLogError::Precondition(msg.into())
    }

    /// Construct a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        PowerLogError::Transport(msg.into())
    }

    /// Construct an FHE error
    pub fn fhe(msg: impl Into<String>) -> Self {
        PowerLogError::Fhe(msg.into())
    }

    /// Whether the error was raised before anything left the process
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            PowerLogError::InvalidInput(_)
                | PowerLogError::Precondition(_)
                | PowerLogError::UninitializedHandle(_)
        )
    }
}

impl core::fmt::Display for PowerLogError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PowerLogError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            PowerLogError::Precondition(msg) => write!(f, "Not ready: {}", msg),
            PowerLogError::Transport(msg) => write!(f, "Network error: {}", msg),
            PowerLogError::Transaction(msg) => write!(f, "Transaction failed: {}", msg),
            PowerLogError::Authorization(msg) => {
                write!(f, "Decryption authorization failed: {}", msg)
            }
            PowerLogError::UninitializedHandle(id) => {
                write!(f, "Record #{} is not initialized", id)
            }
            PowerLogError::Fhe(msg) => write!(f, "FHE error: {}", msg),
            PowerLogError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            PowerLogError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for PowerLogError {}

impl From<serde_json::Error> for PowerLogError {
    fn from(err: serde_json::Error) -> Self {
        PowerLogError::Serialization(format!("{}", err))
    }
}

impl From<hex::FromHexError> for PowerLogError {
    fn from(err: hex::FromHexError) -> Self {
        PowerLogError::Serialization(format!("Invalid hex: {}", err))
    }
}

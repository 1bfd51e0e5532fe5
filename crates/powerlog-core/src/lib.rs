//! Core types and orchestration for an encrypted power-usage log
//!
//! Readings are encrypted client-side under FHE, stored on-chain by the
//! `PowerUsage` contract as ciphertext handles, and decrypted only by their
//! owner after signing a user-decryption authorization.
//!
//! This crate is chain-client agnostic: it defines the domain types, the
//! [`RecordContract`], [`FheInstance`] and [`AuthorizationSigner`] seams, the
//! FHE initializer state machine and the [`RecordOrchestrator`]. The alloy
//! bindings live in `powerlog-ethereum`.
//!
//! # Features
//!
//! - **testing**: in-memory contract, signer and coprocessor fakes for
//!   downstream tests

pub mod authorization;
pub mod error;
pub mod fhe;
pub mod handle;
pub mod input;
pub mod orchestrator;
pub mod protocol;
pub mod record;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod mock;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authorization::{
    DecryptionAuthorization, DecryptionKeypair, DecryptionRequest, InMemorySignatureStorage,
    SignatureStorage,
};
pub use error::PowerLogError;
pub use fhe::{FheEndpoint, FheFactory, FheInitializer, FheRequest, FheStatus};
pub use handle::{AccountAddress, CiphertextHandle, EncryptedInput, FheType};
pub use input::{parse_positive_integer, UsageReading, DEFAULT_PERIOD};
#[cfg(any(test, feature = "testing"))]
pub use mock::{MockCoprocessor, MockFheInstance};
pub use orchestrator::{
    DecryptOutcome, RecordOrchestrator, SessionContext, SessionState, SubmitOutcome,
};
pub use protocol::FhevmMetadata;
pub use record::{DecryptStatus, DeploymentStatus, Record, RecordId, RecordMetadata};
pub use traits::{AuthorizationSigner, FheInstance, RecordContract, SubmittedRecord};

//! Ciphertext handles, account addresses and encrypted inputs
//!
//! These are the chain-independent byte types exchanged between the FHE client,
//! the contract binding and the orchestrator. Conversions to alloy types live
//! in `powerlog-ethereum`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::PowerLogError;

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], PowerLogError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() != N * 2 {
        return Err(PowerLogError::invalid_input(format!(
            "{} must be {} hex characters, got {}",
            what,
            N * 2,
            digits.len()
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)?;
    Ok(out)
}

/// A 20-byte account or contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountAddress(pub [u8; 20]);

impl AccountAddress {
    /// The all-zero address, used by deployment metadata as "not deployed"
    pub const ZERO: AccountAddress = AccountAddress([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountAddress {
    type Err = PowerLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s, "Address").map(AccountAddress)
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque 32-byte reference to a value held by the FHE coprocessor
///
/// The all-zero handle is the sentinel for "uninitialized": the contract returns
/// it for records whose usage was never set, and it must never be sent to the
/// decryption service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CiphertextHandle(pub [u8; 32]);

impl CiphertextHandle {
    /// The uninitialized sentinel
    pub const ZERO: CiphertextHandle = CiphertextHandle([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// FHE type id encoded in byte 30 of FHEVM handles
    pub fn fhe_type_id(&self) -> u8 {
        self.0[30]
    }

    /// Chain id encoded in bytes 22..30 of FHEVM handles
    pub fn chain_id(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[22..30]);
        u64::from_be_bytes(buf)
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for CiphertextHandle {
    type Err = PowerLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s, "Ciphertext handle").map(CiphertextHandle)
    }
}

impl Serialize for CiphertextHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CiphertextHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Encrypted integer types understood by the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FheType {
    Ebool,
    Euint8,
    Euint16,
    Euint32,
    Euint64,
}

impl FheType {
    /// Type id as encoded in handles
    pub fn type_id(self) -> u8 {
        match self {
            FheType::Ebool => 0,
            FheType::Euint8 => 2,
            FheType::Euint16 => 3,
            FheType::Euint32 => 4,
            FheType::Euint64 => 5,
        }
    }

    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(FheType::Ebool),
            2 => Some(FheType::Euint8),
            3 => Some(FheType::Euint16),
            4 => Some(FheType::Euint32),
            5 => Some(FheType::Euint64),
            _ => None,
        }
    }

    /// Largest plaintext representable by this type
    pub fn max_value(self) -> u64 {
        match self {
            FheType::Ebool => 1,
            FheType::Euint8 => u8::MAX as u64,
            FheType::Euint16 => u16::MAX as u64,
            FheType::Euint32 => u32::MAX as u64,
            FheType::Euint64 => u64::MAX,
        }
    }
}

/// A ciphertext handle together with the proof the contract needs to accept it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    /// Handle of the encrypted value
    pub handle: CiphertextHandle,
    /// Input validity proof (hex encoded in JSON)
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
}

//! On-disk state kept between CLI runs
//!
//! Signed decryption authorizations normally live only as long as the
//! process. When `signatures` is configured they are also kept in a JSON
//! file, so a later decrypt does not re-sign while the cached authorization
//! is valid. The file holds decryption private keys and is created with
//! owner-only permissions.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use powerlog_core::{DecryptionAuthorization, SignatureStorage};
use tracing::{debug, warn};

use crate::{CliResult, CliUtils};

/// Signature storage backed by a JSON file
///
/// The file is rewritten on every change. Write failures are logged and the
/// in-memory copy stays authoritative for the rest of the process.
#[derive(Debug)]
pub struct FileSignatureStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, DecryptionAuthorization>>,
}

impl FileSignatureStorage {
    /// Open `path`, starting empty when it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> CliResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = CliUtils::read_file(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &BTreeMap<String, DecryptionAuthorization>) {
        if let Err(err) = write_json(&self.path, entries) {
            warn!("Could not save decryption authorizations: {}", err);
        }
    }
}

impl SignatureStorage for FileSignatureStorage {
    fn get(&self, key: &str) -> Option<DecryptionAuthorization> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, authorization: DecryptionAuthorization) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), authorization);
            self.persist(&entries);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(key).is_some() {
                self.persist(&entries);
            }
        }
    }
}

/// Write `value` as pretty JSON, readable and writable by the owner only
fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        CliUtils::ensure_output_dir(parent)?;
    }
    let contents = serde_json::to_string_pretty(value)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path)?;
    // `mode` only applies on creation; tighten a file left by an older run
    #[cfg(unix)]
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())?;
    debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CliError;
    use powerlog_core::{AccountAddress, DecryptionKeypair};

    fn authorization() -> DecryptionAuthorization {
        DecryptionAuthorization {
            user_address: AccountAddress([0xaa; 20]),
            chain_id: 31337,
            contract_addresses: vec![AccountAddress([0xc0; 20])],
            start_timestamp: 1_700_000_000,
            duration_days: 365,
            keypair: DecryptionKeypair {
                public_key: vec![1; 32],
                private_key: vec![2; 32],
            },
            signature: vec![3; 65],
        }
    }

    #[test]
    fn test_authorizations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".powerlog").join("signatures.json");

        let storage = FileSignatureStorage::open(&path).unwrap();
        assert!(storage.is_empty());
        storage.set("31337:key", authorization());
        assert!(path.exists());

        let reopened = FileSignatureStorage::open(&path).unwrap();
        assert_eq!(reopened.get("31337:key"), Some(authorization()));

        reopened.remove("31337:key");
        assert!(FileSignatureStorage::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_signature_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(FileSignatureStorage::open(&path), Err(CliError::Json(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_signature_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let storage = FileSignatureStorage::open(&path).unwrap();
        storage.set("31337:key", authorization());
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let fresh = dir.path().join("fresh").join("signatures.json");
        FileSignatureStorage::open(&fresh).unwrap().set("31337:key", authorization());
        let mode = fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

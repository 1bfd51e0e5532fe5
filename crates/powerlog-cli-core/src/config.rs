//! Configuration file and environment handling
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML file
//! (`--config`, or `powerlog.toml` in the working directory when present),
//! and finally command-line flags and their environment fallbacks.
//!
//! ```toml
//! rpc_url = "http://localhost:8545"
//! deployments = "abi/PowerUsageAddresses.json"
//! relayer_url = "https://relayer.testnet.zama.cloud"
//! # Keep signed decryption authorizations between runs (owner-only file)
//! signatures = ".powerlog/signatures.json"
//!
//! [mock_chains]
//! 31337 = "http://localhost:8545"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use powerlog_ethereum::{DeploymentRegistry, FhevmConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CliError, CliResult, CliUtils, CommonArgs};

pub const DEFAULT_CONFIG_FILE: &str = "powerlog.toml";
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Resolved CLI configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerlogConfig {
    pub rpc_url: String,
    /// Generated `PowerUsageAddresses.json`
    pub deployments: PathBuf,
    /// Chain id (as a string key) to local FHEVM node URL; empty keeps the default
    pub mock_chains: BTreeMap<String, String>,
    pub relayer_url: Option<String>,
    /// File caching signed decryption authorizations between runs; in memory when unset
    pub signatures: Option<PathBuf>,
}

impl Default for PowerlogConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            deployments: PathBuf::from("abi/PowerUsageAddresses.json"),
            mock_chains: BTreeMap::new(),
            relayer_url: None,
            signatures: None,
        }
    }
}

impl PowerlogConfig {
    pub fn from_toml(contents: &str) -> CliResult<Self> {
        toml::from_str(contents).map_err(|e| CliError::Configuration(e.to_string()))
    }

    /// Load the explicit config file, or the default one if it exists
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => {
                let contents = CliUtils::read_file(path)?;
                debug!("Loaded configuration from {}", path.display());
                Self::from_toml(&contents)
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Some(Path::new(DEFAULT_CONFIG_FILE)))
            }
            None => Ok(Self::default()),
        }
    }

    /// Load the config file named by `args`, then apply `args` on top
    pub fn resolve(args: &CommonArgs) -> CliResult<Self> {
        let mut config = Self::load(args.config.as_deref().map(Path::new))?;
        config.apply_args(args);
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &CommonArgs) {
        if let Some(rpc_url) = &args.rpc_url {
            self.rpc_url = rpc_url.clone();
        }
        if let Some(path) = &args.signature_file {
            self.signatures = Some(PathBuf::from(path));
        }
    }

    /// FHE factory settings: defaults, with mock chains and relayer URL overridden
    pub fn fhevm_config(&self) -> CliResult<FhevmConfig> {
        let mut fhevm = FhevmConfig::with_defaults()?;
        if !self.mock_chains.is_empty() {
            fhevm.mock_chains = self
                .mock_chains
                .iter()
                .map(|(chain, url)| {
                    chain
                        .trim()
                        .parse::<u64>()
                        .map(|id| (id, url.clone()))
                        .map_err(|_| {
                            CliError::Configuration(format!(
                                "mock_chains key '{}' is not a chain id",
                                chain
                            ))
                        })
                })
                .collect::<CliResult<_>>()?;
        }
        if let Some(relayer_url) = &self.relayer_url {
            fhevm.relayer.relayer_url = relayer_url.clone();
        }
        Ok(fhevm)
    }

    /// Deployment registry from the address file; empty when the file is missing
    pub fn registry(&self) -> CliResult<DeploymentRegistry> {
        if !self.deployments.exists() {
            warn!(
                "No deployment file at {}; run 'powerlog gen-addresses' after deploying",
                self.deployments.display()
            );
            return Ok(DeploymentRegistry::new());
        }
        Ok(DeploymentRegistry::load(&self.deployments)?)
    }
}

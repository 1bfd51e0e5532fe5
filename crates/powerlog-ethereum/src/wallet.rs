//! Wallet and provider adapter
//!
//! Wraps an alloy [`DynProvider`] for reads and, when a private key is
//! configured, a [`PrivateKeySigner`] for writes and decryption signatures.
//! Without a key the wallet is read-only and reports no account.

use alloy::network::EthereumWallet;
use alloy::primitives::U256;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::{Eip712Domain, SolStruct};
use powerlog_core::{AccountAddress, AuthorizationSigner, DecryptionRequest, PowerLogError};
use tracing::{debug, info};

use crate::bindings::{
    from_address, parse_url, to_address, EthereumError, UserDecryptRequestVerification,
    DECRYPTION_DOMAIN_NAME, DECRYPTION_DOMAIN_VERSION,
};

/// Connection to one chain through one RPC endpoint
#[derive(Clone)]
pub struct AlloyWallet {
    rpc_url: String,
    chain_id: u64,
    provider: DynProvider,
    signer: Option<PrivateKeySigner>,
}

impl std::fmt::Debug for AlloyWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyWallet")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("account", &self.account())
            .finish()
    }
}

impl AlloyWallet {
    /// Connect to `rpc_url`, optionally with a hex private key
    ///
    /// The chain id is read from the node once, at connection time.
    pub async fn connect(rpc_url: &str, private_key: Option<&str>) -> Result<Self, EthereumError> {
        let signer = private_key.map(parse_private_key).transpose()?;
        let url = parse_url(rpc_url)?;

        let provider = match &signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer.clone()))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| EthereumError::Rpc(format!("eth_chainId via {} failed: {}", rpc_url, e)))?;
        let signer = signer.map(|s| s.with_chain_id(Some(chain_id)));

        info!(
            "Connected to chain {} via {} ({})",
            chain_id,
            rpc_url,
            match &signer {
                Some(s) => format!("account {}", s.address()),
                None => "read-only".to_string(),
            }
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            chain_id,
            provider,
            signer,
        })
    }

    /// Connected account; `None` for a read-only wallet
    pub fn account(&self) -> Option<AccountAddress> {
        self.signer.as_ref().map(|s| from_address(s.address()))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Write-capable signer, present only when a key is configured
    pub fn signer(&self) -> Option<WalletSigner> {
        self.signer.clone().map(WalletSigner)
    }

    pub fn is_connected(&self) -> bool {
        self.signer.is_some()
    }

    /// Reconnect the same key to another endpoint
    ///
    /// Returns a new adapter; anything derived from the old `(rpc, chain)`
    /// pair must be re-derived from it.
    pub async fn switch_chain(&self, rpc_url: &str) -> Result<Self, EthereumError> {
        let wallet = match &self.signer {
            Some(signer) => {
                let key = hex::encode(signer.to_bytes());
                Self::connect(rpc_url, Some(&key)).await?
            }
            None => Self::connect(rpc_url, None).await?,
        };
        debug!("Switched from chain {} to {}", self.chain_id, wallet.chain_id);
        Ok(wallet)
    }
}

fn parse_private_key(key: &str) -> Result<PrivateKeySigner, EthereumError> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| EthereumError::InvalidAddress(format!("invalid private key: {}", e)))
}

/// Local key signer for decryption authorizations
#[derive(Debug, Clone)]
pub struct WalletSigner(PrivateKeySigner);

impl WalletSigner {
    pub fn from_private_key(key: &str) -> Result<Self, EthereumError> {
        parse_private_key(key).map(WalletSigner)
    }

    pub fn inner(&self) -> &PrivateKeySigner {
        &self.0
    }
}

/// Build the EIP-712 domain and message for a decryption request
pub fn decryption_typed_data(
    request: &DecryptionRequest,
) -> (Eip712Domain, UserDecryptRequestVerification) {
    let domain = Eip712Domain::new(
        Some(DECRYPTION_DOMAIN_NAME.into()),
        Some(DECRYPTION_DOMAIN_VERSION.into()),
        Some(U256::from(request.chain_id)),
        Some(to_address(request.verifying_contract)),
        None,
    );
    let message = UserDecryptRequestVerification {
        publicKey: request.public_key.clone().into(),
        contractAddresses: request
            .contract_addresses
            .iter()
            .copied()
            .map(to_address)
            .collect(),
        startTimestamp: U256::from(request.start_timestamp),
        durationDays: U256::from(request.duration_days),
        extraData: request.extra_data.clone().into(),
    };
    (domain, message)
}

impl AuthorizationSigner for WalletSigner {
    fn address(&self) -> AccountAddress {
        from_address(self.0.address())
    }

    async fn sign_decryption_request(
        &self,
        request: &DecryptionRequest,
    ) -> Result<Vec<u8>, PowerLogError> {
        let (domain, message) = decryption_typed_data(request);
        let hash = message.eip712_signing_hash(&domain);
        let signature = self
            .0
            .sign_hash(&hash)
            .await
            .map_err(EthereumError::from)?;
        Ok(signature.as_bytes().to_vec())
    }
}

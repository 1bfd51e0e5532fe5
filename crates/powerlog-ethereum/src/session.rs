//! Session derivation from a wallet and a deployment registry
//!
//! A session is a pure function of the wallet's `(rpc endpoint, chain id)`
//! pair; after a chain switch the host derives a new one.

use std::sync::Arc;

use powerlog_core::{FheRequest, FheStatus, SessionContext, SignatureStorage};
use tokio::sync::watch;

use crate::contract::AlloyRecordContract;
use crate::deployments::DeploymentRegistry;
use crate::relayer::FhevmInstance;
use crate::wallet::{AlloyWallet, WalletSigner};

pub type EthereumSession = SessionContext<AlloyRecordContract, FhevmInstance, WalletSigner>;

/// FHE initializer input for this wallet
pub fn fhe_request(wallet: &AlloyWallet) -> FheRequest {
    FheRequest::new(wallet.rpc_url(), wallet.chain_id())
}

/// Build the orchestrator context for `wallet` on its current chain
pub fn derive_session(
    wallet: &AlloyWallet,
    registry: &DeploymentRegistry,
    fhe: watch::Receiver<FheStatus<FhevmInstance>>,
    signature_storage: Arc<dyn SignatureStorage>,
) -> EthereumSession {
    let chain_id = wallet.chain_id();
    let account = wallet.account();
    let contract = registry
        .address_for(chain_id)
        .map(|address| AlloyRecordContract::new(address, wallet.provider().clone(), account));

    SessionContext {
        account,
        chain_id: Some(chain_id),
        contract,
        deployment: registry.status_for(Some(chain_id)),
        signer: wallet.signer(),
        fhe,
        signature_storage,
    }
}

//! Command implementations
//!
//! Arguments are validated into an [`Action`] before anything touches the
//! network. Actions that need the chain then run against a [`Session`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use powerlog_cli_core::{
    render_record_detail, render_session, CliError, CliUtils, FileSignatureStorage,
    PowerlogConfig, SessionView,
};
use powerlog_core::{
    AccountAddress, DecryptOutcome, FheInitializer, FheStatus, InMemorySignatureStorage,
    PowerLogError, Record, RecordContract, RecordId, RecordOrchestrator, SignatureStorage,
    SubmitOutcome, UsageReading,
};
use powerlog_ethereum::{
    derive_session, fhe_request, AlloyRecordContract, AlloyWallet, DeploymentEntry,
    DeploymentRegistry, FhevmFactory, FhevmInstance, WalletSigner,
};

type Orchestrator = RecordOrchestrator<AlloyRecordContract, FhevmInstance, WalletSigner>;

/// A validated command
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Address,
    AddRecord(UsageReading),
    BatchAdd(Vec<UsageReading>),
    GetRecord(RecordId),
    DecryptRecord(RecordId),
    List { decrypt: bool },
    Exists(RecordId),
    Total,
    GenAddresses { deployments: PathBuf, out: PathBuf },
}

impl Action {
    /// Whether the action runs against a node
    pub fn needs_session(&self) -> bool {
        !matches!(self, Action::GenAddresses { .. })
    }
}

/// Validate `--value`/`--period` the way the contract will see them
pub fn parse_reading(value: &str, period: &str) -> Result<UsageReading, CliError> {
    let kwh = CliUtils::positive_integer("value", value)?;
    let period = CliUtils::positive_integer("period", period)?;
    reading(kwh, period)
}

pub fn parse_batch(values: &str, period: &str) -> Result<Vec<UsageReading>, CliError> {
    let period = CliUtils::positive_integer("period", period)?;
    CliUtils::positive_integer_list("values", values)?
        .into_iter()
        .map(|kwh| reading(kwh, period))
        .collect()
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, CliError> {
    CliUtils::positive_integer("id", raw).map(RecordId)
}

pub fn parse_contract_address(raw: &str) -> Result<AccountAddress, CliError> {
    AccountAddress::from_str(raw)
        .map_err(|e| CliError::InvalidArgument(format!("Argument --address: {}", e)))
}

fn reading(kwh: u64, period: u64) -> Result<UsageReading, CliError> {
    let period = i64::try_from(period).unwrap_or(i64::MAX);
    UsageReading::new(kwh as f64, Some(period)).map_err(CliError::from_core)
}

/// Command result in both renderings
#[derive(Debug)]
pub struct Output {
    pub value: serde_json::Value,
    pub text: String,
}

impl Output {
    fn new<T: Serialize>(value: &T, text: impl Into<String>) -> Result<Self> {
        Ok(Self {
            value: serde_json::to_value(value)?,
            text: text.into(),
        })
    }
}

/// Wallet, contract binding, FHE client and orchestrator for one invocation
pub struct Session {
    wallet: AlloyWallet,
    orchestrator: Orchestrator,
    fhe: FheInitializer<FhevmFactory>,
}

impl Session {
    pub async fn open(
        config: &PowerlogConfig,
        private_key: Option<&str>,
        contract_override: Option<AccountAddress>,
    ) -> Result<Self> {
        let wallet = AlloyWallet::connect(&config.rpc_url, private_key)
            .await
            .with_context(|| format!("cannot connect to {}", config.rpc_url))?;

        let mut registry = config.registry()?;
        if let Some(address) = contract_override {
            debug!("Using PowerUsage at {} on chain {}", address, wallet.chain_id());
            registry.insert(DeploymentEntry {
                address,
                chain_id: wallet.chain_id(),
                chain_name: "override".to_string(),
            });
        }

        let fhe = FheInitializer::new(FhevmFactory::new(config.fhevm_config()?));

        let storage: Arc<dyn SignatureStorage> = match &config.signatures {
            Some(path) => {
                debug!("Caching decryption authorizations in {}", path.display());
                Arc::new(FileSignatureStorage::open(path)?)
            }
            None => Arc::new(InMemorySignatureStorage::new()),
        };
        let ctx = derive_session(&wallet, &registry, fhe.subscribe(), storage);

        Ok(Self {
            wallet,
            orchestrator: RecordOrchestrator::new(ctx),
            fhe,
        })
    }

    /// Initialize the FHE client for the wallet's chain, failing with its cause
    async fn ready_fhe(&self) -> Result<()> {
        match self.fhe.refresh(&fhe_request(&self.wallet)).await {
            FheStatus::Ready(_) => Ok(()),
            FheStatus::Error(cause) => bail!("FHE client failed to initialize: {}", cause),
            other => bail!("FHE client is {}", other.label()),
        }
    }

    fn contract(&self) -> Result<&AlloyRecordContract> {
        self.orchestrator.contract().ok_or_else(|| {
            PowerLogError::precondition(format!(
                "PowerUsage is not deployed on chain {}",
                self.wallet.chain_id()
            ))
            .into()
        })
    }
}

pub async fn run(session: &Session, action: Action) -> Result<Output> {
    match action {
        Action::Address => address(session),
        Action::AddRecord(reading) => add_record(session, reading).await,
        Action::BatchAdd(readings) => batch_add(session, readings).await,
        Action::GetRecord(id) => get_record(session, id).await,
        Action::DecryptRecord(id) => decrypt_record(session, id).await,
        Action::List { decrypt } => list(session, decrypt).await,
        Action::Exists(id) => exists(session, id).await,
        Action::Total => total(session).await,
        action @ Action::GenAddresses { .. } => run_local(action),
    }
}

/// Run an action that needs no node connection
pub fn run_local(action: Action) -> Result<Output> {
    match action {
        Action::GenAddresses { deployments, out } => gen_addresses(&deployments, &out),
        other => bail!("{:?} needs a node connection", other),
    }
}

fn address(session: &Session) -> Result<Output> {
    let contract = session.orchestrator.contract().map(|c| c.address());
    let account = session.wallet.account();
    let chain_id = session.wallet.chain_id();

    let mut lines = vec![match contract {
        Some(address) => format!("PowerUsage address is {}", address),
        None => format!("PowerUsage is not deployed on chain {}", chain_id),
    }];
    lines.push(format!("Chain: {}", chain_id));
    lines.push(match account {
        Some(account) => format!("Account: {}", account),
        None => "Account: none (read-only)".to_string(),
    });

    Output::new(
        &json!({
            "contract": contract,
            "chain_id": chain_id,
            "account": account,
            "deployment": session.orchestrator.is_deployed(),
        }),
        lines.join("\n"),
    )
}

fn submitted_line(reading: &UsageReading, outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Submitted(submitted) => {
            let record = submitted
                .record_id
                .map(|id| format!(" as record #{}", id))
                .unwrap_or_default();
            format!(
                "tx:{} addRecord({} kWh, period {}) succeeded{}",
                submitted.tx_hash, reading.kwh, reading.period, record
            )
        }
        SubmitOutcome::Skipped => "Another submission is in flight; nothing sent".to_string(),
    }
}

async fn add_record(session: &Session, reading: UsageReading) -> Result<Output> {
    session.ready_fhe().await?;
    let outcome = session
        .orchestrator
        .submit_record(reading.kwh as f64, Some(i64::from(reading.period)))
        .await?;
    Output::new(&outcome, submitted_line(&reading, &outcome))
}

async fn batch_add(session: &Session, readings: Vec<UsageReading>) -> Result<Output> {
    session.ready_fhe().await?;
    let total = readings.len();
    let mut outcomes = Vec::with_capacity(total);
    let mut lines = Vec::with_capacity(total + 1);

    for (index, reading) in readings.iter().enumerate() {
        info!("Adding record {}/{}: {} kWh", index + 1, total, reading.kwh);
        let outcome = session
            .orchestrator
            .submit_record(reading.kwh as f64, Some(i64::from(reading.period)))
            .await
            .with_context(|| format!("record {}/{} failed", index + 1, total))?;
        lines.push(submitted_line(reading, &outcome));
        outcomes.push(outcome);
    }
    lines.push(format!("Added {} power usage records", total));

    Output::new(&outcomes, lines.join("\n"))
}

async fn get_record(session: &Session, id: RecordId) -> Result<Output> {
    let contract = session.contract()?;
    let metadata = contract.record_metadata(id).await?;
    let handle = contract.record_usage(id).await?;
    let record = Record::new(id, metadata, handle);
    Output::new(&record, render_record_detail(&record))
}

async fn decrypt_record(session: &Session, id: RecordId) -> Result<Output> {
    session.ready_fhe().await?;
    match session.orchestrator.decrypt_record(id).await {
        Ok(DecryptOutcome::Decrypted(kwh)) => Output::new(
            &json!({ "record_id": id, "initialized": true, "clear_usage": kwh }),
            format!("Record #{}:\n  Clear Usage: {} kWh", id, kwh),
        ),
        Ok(DecryptOutcome::Skipped) => {
            powerlog_cli_core::cli_error!("Another decryption is in flight")
        }
        Err(err @ PowerLogError::UninitializedHandle(_)) => Output::new(
            &json!({ "record_id": id, "initialized": false }),
            err.to_string(),
        ),
        Err(err) => Err(err.into()),
    }
}

async fn list(session: &Session, decrypt: bool) -> Result<Output> {
    let orchestrator = &session.orchestrator;
    if orchestrator.can_load_records() {
        orchestrator.load_user_records().await?;

        if decrypt {
            session.ready_fhe().await?;
            for record in orchestrator.records() {
                if let Err(err) = orchestrator.decrypt_record(record.record_id).await {
                    warn!("Record #{}: {}", record.record_id, err);
                }
            }
        }
    }

    let view = SessionView::capture(orchestrator);
    let text = render_session(&view);
    Output::new(&view, text)
}

async fn exists(session: &Session, id: RecordId) -> Result<Output> {
    let exists = session.contract()?.record_exists(id).await?;
    let text = if exists {
        format!("Record #{} exists", id)
    } else {
        format!("Record #{} does not exist", id)
    };
    Output::new(&json!({ "record_id": id, "exists": exists }), text)
}

async fn total(session: &Session) -> Result<Output> {
    let total = session.contract()?.total_records().await?;
    Output::new(&json!({ "total_records": total }), format!("Total records: {}", total))
}

fn gen_addresses(deployments: &Path, out: &Path) -> Result<Output> {
    let registry = DeploymentRegistry::from_hardhat_deployments(deployments)
        .with_context(|| format!("cannot read deployments under {}", deployments.display()))?;
    let written = registry.write_generated(out)?;

    let mut lines: Vec<String> = registry
        .entries()
        .map(|entry| {
            let state = if entry.is_deployed() { "" } else { " (not deployed)" };
            format!("{} ({}): {}{}", entry.chain_name, entry.chain_id, entry.address, state)
        })
        .collect();
    lines.extend(written.iter().map(|path| format!("Generated {}", path.display())));

    Output::new(
        &json!({
            "deployments": registry.entries().collect::<Vec<_>>(),
            "written": written,
        }),
        lines.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        let reading = parse_reading("150", "3").unwrap();
        assert_eq!((reading.kwh, reading.period), (150, 3));

        let err = parse_reading("0", "1").unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: Argument --value must be a positive integer");
        let err = parse_reading("150", "-1").unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: Argument --period must be a positive integer");
        assert!(parse_reading("150.5", "1").is_err());
        assert!(parse_reading("150", "4294967296").is_err());
        assert!(parse_reading("4294967296", "1").is_err());
    }

    #[test]
    fn test_parse_batch() {
        let readings = parse_batch("150, 200,175", "2").unwrap();
        assert_eq!(readings.iter().map(|r| r.kwh).collect::<Vec<_>>(), vec![150, 200, 175]);
        assert!(readings.iter().all(|r| r.period == 2));
        assert!(parse_batch("150,abc", "2").is_err());
        assert!(parse_batch("150", "0").is_err());
    }

    #[test]
    fn test_parse_ids_and_addresses() {
        assert_eq!(parse_record_id("7").unwrap(), RecordId(7));
        assert!(matches!(parse_record_id("0"), Err(CliError::InvalidArgument(_))));
        assert!(parse_contract_address("0x5fbdb2315678afecb367f032d93f642f64180aa3").is_ok());
        assert!(matches!(parse_contract_address("0x1234"), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_gen_addresses_action_is_local() {
        let action = Action::GenAddresses {
            deployments: PathBuf::from("deployments"),
            out: PathBuf::from("abi"),
        };
        assert!(!action.needs_session());
        assert!(Action::Total.needs_session());
    }
}

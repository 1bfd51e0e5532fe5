//! Text and JSON presentation of a record session
//!
//! [`SessionView`] is a plain snapshot of what the orchestrator knows. The
//! text renderer picks one of three screens from it: connect-a-wallet,
//! not-deployed-on-this-chain, or the record list.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use powerlog_core::{
    AccountAddress, AuthorizationSigner, DecryptStatus, DeploymentStatus, FheInstance, Record,
    RecordContract, RecordId, RecordOrchestrator, SessionState,
};

/// One record with its display state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: Record,
    pub date: String,
    pub status: DecryptStatus,
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub account: Option<AccountAddress>,
    pub chain_id: Option<u64>,
    pub contract: Option<AccountAddress>,
    pub deployment: DeploymentStatus,
    pub fhe_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhe_error: Option<String>,
    pub records: Vec<RecordView>,
    pub is_submitting: bool,
    pub is_loading: bool,
    pub decrypting: Option<RecordId>,
    pub message: Option<String>,
}

impl SessionView {
    pub fn capture<C, I, S>(orchestrator: &RecordOrchestrator<C, I, S>) -> Self
    where
        C: RecordContract,
        I: FheInstance,
        S: AuthorizationSigner,
    {
        let ctx = orchestrator.context();
        let fhe = orchestrator.fhe_status();
        let state = orchestrator.snapshot();
        Self {
            account: ctx.account,
            chain_id: ctx.chain_id,
            contract: orchestrator.contract().map(|c| c.address()),
            deployment: orchestrator.is_deployed(),
            fhe_status: fhe.label(),
            fhe_error: fhe.error().map(str::to_string),
            records: record_views(&state),
            is_submitting: state.is_submitting,
            is_loading: state.is_loading,
            decrypting: state.decrypting,
            message: state.message,
        }
    }
}

fn record_views(state: &SessionState) -> Vec<RecordView> {
    state
        .records
        .iter()
        .map(|record| RecordView {
            record: record.clone(),
            date: format_date(record.timestamp),
            status: state.decrypt_status(record),
        })
        .collect()
}

/// Calendar date (UTC) of a contract timestamp
pub fn format_date(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| format!("@{}", timestamp))
}

/// RFC 3339 time (UTC) of a contract timestamp
pub fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| format!("@{}", timestamp))
}

/// Full metadata of a single record, as printed by `get-record`
pub fn render_record_detail(record: &Record) -> String {
    let mut lines = vec![
        format!("Record #{}:", record.record_id),
        format!("  Owner: {}", record.owner),
        format!("  Period: {}", record.period),
        format!("  Timestamp: {}", format_timestamp(record.timestamp)),
        format!("  Encrypted Usage: {}", record.encrypted_usage),
    ];
    if let Some(kwh) = record.decrypted_value {
        lines.push(format!("  Clear Usage: {} kWh", kwh));
    }
    lines.join("\n")
}

/// One record as two lines: header, then value or placeholder
pub fn render_record(record: &Record, status: DecryptStatus) -> String {
    let value = match status {
        DecryptStatus::Decrypted(kwh) => format!("{} kWh (Decrypted)", kwh),
        DecryptStatus::Decrypting => "Decrypting...".to_string(),
        DecryptStatus::Encrypted => "Encrypted value stored on-chain".to_string(),
    };
    format!(
        "Record #{}  Period: {}  {}\n  {}",
        record.record_id,
        record.period,
        format_date(record.timestamp),
        value
    )
}

pub fn render_session(view: &SessionView) -> String {
    let mut lines = Vec::new();

    let Some(account) = view.account else {
        lines.push("Connect Your Wallet".to_string());
        lines.push(
            "Connect your wallet to start logging your power usage (set PRIVATE_KEY or pass --private-key)"
                .to_string(),
        );
        return lines.join("\n");
    };

    if view.deployment == DeploymentStatus::NotDeployed {
        let chain = view
            .chain_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!("PowerUsage is not deployed on chain {}", chain));
        lines.push(
            "Deploy the contract to this network, then run 'powerlog gen-addresses'".to_string(),
        );
        return lines.join("\n");
    }

    lines.push("Encrypted Power Usage Log".to_string());
    lines.push(format!("Account: {}", account));
    if let Some(chain_id) = view.chain_id {
        lines.push(format!("Chain: {}", chain_id));
    }
    if let Some(contract) = view.contract {
        lines.push(format!("Contract: {}", contract));
    }
    match &view.fhe_error {
        Some(cause) => lines.push(format!("FHE: {} ({})", view.fhe_status, cause)),
        None => lines.push(format!("FHE: {}", view.fhe_status)),
    }
    if let Some(message) = &view.message {
        lines.push(format!("> {}", message));
    }

    lines.push(String::new());
    lines.push("Your Records".to_string());
    if view.records.is_empty() {
        lines.push("No power usage records yet.".to_string());
    }
    for item in &view.records {
        lines.push(render_record(&item.record, item.status));
    }
    lines.join("\n")
}

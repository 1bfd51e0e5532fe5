//! `powerlog` command-line client
//!
//! Encrypts household power-usage readings, stores them with the `PowerUsage`
//! contract and decrypts them again for their owner. Configuration comes from
//! `.env`, an optional `powerlog.toml` and the flags below.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use powerlog_cli_core::{init_logging, CliUtils, CommonArgs, PowerlogConfig};

mod commands;

use commands::{Action, Session};

#[derive(Parser)]
#[command(name = "powerlog")]
#[command(about = "Encrypted power-usage log on an FHEVM chain")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Optionally specify the PowerUsage contract address
    #[arg(long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the PowerUsage address, chain and account
    Address,

    /// Encrypt a reading and add it as a new record
    AddRecord {
        /// Power usage in kWh
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        /// Period identifier (day/month number)
        #[arg(long, default_value = "1", allow_hyphen_values = true)]
        period: String,
    },

    /// Add several readings for the same period
    BatchAdd {
        /// Comma-separated kWh values, e.g. 150,200,175
        #[arg(long, allow_hyphen_values = true)]
        values: String,
        /// Period identifier for all records
        #[arg(long, default_value = "1", allow_hyphen_values = true)]
        period: String,
    },

    /// Print a record's metadata and ciphertext handle
    GetRecord {
        #[arg(long, allow_hyphen_values = true)]
        id: String,
    },

    /// Decrypt a record's usage for its owner
    DecryptRecord {
        #[arg(long, allow_hyphen_values = true)]
        id: String,
    },

    /// List the account's records
    List {
        /// Decrypt every record after loading
        #[arg(long)]
        decrypt: bool,
    },

    /// Check whether a record id exists
    Exists {
        #[arg(long, allow_hyphen_values = true)]
        id: String,
    },

    /// Print the number of records across all users
    Total,

    /// Generate address and ABI files from hardhat-deploy output
    GenAddresses {
        /// hardhat-deploy output directory
        #[arg(long, default_value = "deployments")]
        deployments: PathBuf,
        /// Directory for PowerUsageAddresses.json and PowerUsageABI.json
        #[arg(long, default_value = "abi")]
        out: PathBuf,
    },
}

impl Command {
    fn validate(self) -> Result<Action> {
        let action = match self {
            Command::Address => Action::Address,
            Command::AddRecord { value, period } => {
                Action::AddRecord(commands::parse_reading(&value, &period)?)
            }
            Command::BatchAdd { values, period } => {
                Action::BatchAdd(commands::parse_batch(&values, &period)?)
            }
            Command::GetRecord { id } => Action::GetRecord(commands::parse_record_id(&id)?),
            Command::DecryptRecord { id } => Action::DecryptRecord(commands::parse_record_id(&id)?),
            Command::List { decrypt } => Action::List { decrypt },
            Command::Exists { id } => Action::Exists(commands::parse_record_id(&id)?),
            Command::Total => Action::Total,
            Command::GenAddresses { deployments, out } => Action::GenAddresses { deployments, out },
        };
        Ok(action)
    }
}

async fn handle_command(args: Args) -> Result<()> {
    let action = args.command.validate()?;
    let contract = args
        .address
        .as_deref()
        .map(commands::parse_contract_address)
        .transpose()?;
    let config = PowerlogConfig::resolve(&args.common)?;

    let output = if action.needs_session() {
        let session =
            Session::open(&config, args.common.private_key.as_deref(), contract).await?;
        commands::run(&session, action).await?
    } else {
        commands::run_local(action)?
    };

    let rendered = CliUtils::render(&output.value, || output.text.clone(), &args.common.format)?;
    CliUtils::write_output(&rendered, args.common.output.as_deref())?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.common.verbose);

    if let Err(e) = handle_command(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
